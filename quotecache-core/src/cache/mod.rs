//! Tiered caching: L1 memory, L2 distributed key-value store, L3 durable store.
//!
//! - `TieredCache`: lookup order, promotion, write-behind, invalidation.
//! - `MemoryTier`: sharded LRU + TTL memory tier.
//! - `KvStore` / `DurableStore`: seams for the slower tiers, with
//!   `MemoryKvStore` and `SqliteStore` implementations.
//! - `CacheStatsCollector`: event-driven counters, health and recommendations.

pub mod entry;
pub mod events;
pub mod memory;
mod remote;
pub mod sqlite;
pub mod stats;
pub mod store;
pub mod tiered;

pub use entry::{now_ms, CacheEntry, Tier};
pub use events::{CacheEvent, CacheObserver, EvictionReason};
pub use memory::{MemoryTier, MemoryTierConfig};
pub use remote::RemoteTierConfig;
pub use sqlite::SqliteStore;
pub use stats::{
    CacheStats, CacheStatsCollector, HealthStatus, Recommendation, RecommendationCategory,
    StatsConfig, TierStats,
};
pub use store::{DurableStore, KeyPattern, KvStore, MemoryKvStore, StoreError};
pub use tiered::{
    CacheError, CacheHit, InvalidationReport, TierSelection, TieredCache, TieredCacheBuilder,
    TieredCacheConfig,
};
