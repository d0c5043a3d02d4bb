//! QuoteCache Core: tiered market-data cache and technical-indicator engine.
//!
//! This crate contains:
//! - Domain types (bars, granularities, bar queries)
//! - Canonical cache keys
//! - The tiered cache: L1 sharded memory, L2 key-value store, L3 SQLite,
//!   with promotion, write-behind and outage handling
//! - Cache statistics and health diagnostics
//! - Market-data sources (Yahoo chart API, CSV directory, synthetic walk)
//! - Indicators, the analysis engine and its cache
//! - The rate-limited preloader

pub mod analysis;
pub mod cache;
pub mod data;
pub mod deadline;
pub mod domain;
pub mod indicators;
pub mod key;
pub mod preload;
