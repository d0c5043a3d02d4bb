//! The three-tier cache: L1 memory, L2 distributed, L3 durable.
//!
//! Lookups go L1 → L2 → L3 and promote hits into every faster tier, keeping
//! the entry's original expiry. Writes land in L1 synchronously and are
//! queued for L2/L3. An unreachable L2/L3 is a miss, never an error.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::entry::{now_ms, CacheEntry, Tier};
use super::events::{CacheEvent, CacheObserver, EvictionReason, Observers};
use super::memory::{MemoryLookup, MemoryTier, MemoryTierConfig};
use super::remote::{DurableBackend, KvBackend, RemoteTier, RemoteTierConfig, WriteOp};
use super::stats::{CacheStats, CacheStatsCollector, SnapshotInput, StatsConfig};
use super::store::{DurableStore, KeyPattern, KvStore};
use crate::deadline::private_pool;
use crate::key::CacheKey;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("TTL for '{0}' must be greater than zero")]
    ZeroTtl(CacheKey),

    #[error("could not encode value for '{key}': {source}")]
    Codec {
        key: CacheKey,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not start cache worker: {0}")]
    Spawn(String),
}

#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    pub memory: MemoryTierConfig,
    pub distributed: RemoteTierConfig,
    pub durable: RemoteTierConfig,
    pub stats: StatsConfig,
    /// Interval of the background L1 sweep. `None` disables the sweeper.
    pub sweep_interval: Option<Duration>,
    /// Threads serving timed L2/L3 reads.
    pub reader_threads: usize,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            memory: MemoryTierConfig::default(),
            distributed: RemoteTierConfig {
                max_ttl: Some(Duration::from_secs(3600)),
                ..RemoteTierConfig::default()
            },
            durable: RemoteTierConfig {
                timeout: Duration::from_millis(500),
                ..RemoteTierConfig::default()
            },
            stats: StatsConfig::default(),
            sweep_interval: Some(Duration::from_secs(30)),
            reader_threads: 4,
        }
    }
}

/// Tiers a write or an invalidation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierSelection {
    Memory,
    Distributed,
    Durable,
    /// L1 and L2 only, for short-lived data that is not worth persisting.
    MemoryAndDistributed,
    All,
}

impl TierSelection {
    pub fn includes(self, tier: Tier) -> bool {
        match self {
            TierSelection::All => true,
            TierSelection::Memory => tier == Tier::Memory,
            TierSelection::Distributed => tier == Tier::Distributed,
            TierSelection::Durable => tier == Tier::Durable,
            TierSelection::MemoryAndDistributed => tier != Tier::Durable,
        }
    }
}

/// What an invalidation did. L2/L3 removals are queued, so only their
/// scheduling is reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub memory_removed: usize,
    pub queued: Vec<Tier>,
}

/// A live entry and the tier that answered.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub entry: Arc<CacheEntry>,
    pub tier: Tier,
}

impl CacheHit {
    pub fn value(&self) -> &[u8] {
        &self.entry.value
    }
}

pub struct TieredCacheBuilder {
    config: TieredCacheConfig,
    distributed: Option<Arc<dyn KvStore>>,
    durable: Option<Arc<dyn DurableStore>>,
    observers: Vec<Arc<dyn CacheObserver>>,
}

impl TieredCacheBuilder {
    pub fn distributed(mut self, store: Arc<dyn KvStore>) -> Self {
        self.distributed = Some(store);
        self
    }

    pub fn durable(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn build(self) -> Result<TieredCache, CacheError> {
        let config = self.config;
        let stats = Arc::new(CacheStatsCollector::new(config.stats.clone()));
        let mut observers: Vec<Arc<dyn CacheObserver>> = vec![stats.clone()];
        observers.extend(self.observers);
        let observers = Observers::new(observers);

        let readers = Arc::new(
            private_pool(config.reader_threads, "quotecache-reader")
                .map_err(|e| CacheError::Spawn(e.to_string()))?,
        );
        let distributed = self
            .distributed
            .map(|store| {
                RemoteTier::spawn(
                    Tier::Distributed,
                    Arc::new(KvBackend(store)),
                    config.distributed.clone(),
                    Arc::clone(&readers),
                    observers.clone(),
                )
            })
            .transpose()
            .map_err(|e| CacheError::Spawn(e.to_string()))?;
        let durable = self
            .durable
            .map(|store| {
                RemoteTier::spawn(
                    Tier::Durable,
                    Arc::new(DurableBackend(store)),
                    config.durable.clone(),
                    Arc::clone(&readers),
                    observers.clone(),
                )
            })
            .transpose()
            .map_err(|e| CacheError::Spawn(e.to_string()))?;

        let memory = Arc::new(MemoryTier::new(&config.memory));
        let sweeper = config
            .sweep_interval
            .map(|interval| Sweeper::spawn(Arc::downgrade(&memory), observers.clone(), interval))
            .transpose()
            .map_err(|e| CacheError::Spawn(e.to_string()))?;

        Ok(TieredCache {
            memory,
            distributed,
            durable,
            observers,
            stats,
            sweeper: Mutex::new(sweeper),
        })
    }
}

pub struct TieredCache {
    memory: Arc<MemoryTier>,
    distributed: Option<RemoteTier>,
    durable: Option<RemoteTier>,
    observers: Observers,
    stats: Arc<CacheStatsCollector>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl TieredCache {
    pub fn builder(config: TieredCacheConfig) -> TieredCacheBuilder {
        TieredCacheBuilder {
            config,
            distributed: None,
            durable: None,
            observers: Vec::new(),
        }
    }

    /// L1 only.
    pub fn in_memory(config: TieredCacheConfig) -> Result<Self, CacheError> {
        Self::builder(config).build()
    }

    fn remotes(&self) -> impl Iterator<Item = &RemoteTier> {
        self.distributed.iter().chain(self.durable.iter())
    }

    /// Look a key up in L1, then L2, then L3. `None` is a miss, never an error.
    pub fn get(&self, key: &CacheKey) -> Option<CacheHit> {
        let now = now_ms();
        match self.memory.get(key, now) {
            MemoryLookup::Hit(entry) => {
                self.observers.emit(CacheEvent::Hit { tier: Tier::Memory });
                return Some(CacheHit {
                    entry,
                    tier: Tier::Memory,
                });
            }
            MemoryLookup::Expired => {
                self.observers.emit(CacheEvent::Evicted {
                    tier: Tier::Memory,
                    reason: EvictionReason::Expired,
                });
                self.observers.emit(CacheEvent::Miss { tier: Tier::Memory });
            }
            MemoryLookup::Absent => {
                self.observers.emit(CacheEvent::Miss { tier: Tier::Memory });
            }
        }

        for remote in self.remotes() {
            let tier = remote.tier();
            match remote.get(key) {
                Some(entry) if !entry.is_expired_at(now) => {
                    self.observers.emit(CacheEvent::Hit { tier });
                    let entry = self.promote(entry, tier, now);
                    return Some(CacheHit { entry, tier });
                }
                Some(_) => {
                    self.observers.emit(CacheEvent::Evicted {
                        tier,
                        reason: EvictionReason::Expired,
                    });
                    self.observers.emit(CacheEvent::Miss { tier });
                    remote.enqueue(WriteOp::Invalidate(KeyPattern::Exact(key.clone())));
                }
                None => self.observers.emit(CacheEvent::Miss { tier }),
            }
        }

        debug!(%key, "cache miss in every tier");
        self.observers.emit(CacheEvent::FullMiss);
        None
    }

    /// Write a hit from `from` into every faster tier, keeping its expiry.
    fn promote(&self, entry: CacheEntry, from: Tier, now: i64) -> Arc<CacheEntry> {
        let entry = entry.with_origin(from);
        if from == Tier::Durable {
            if let Some(l2) = &self.distributed {
                l2.enqueue_put(entry.clone(), now);
                self.observers.emit(CacheEvent::Promoted {
                    from,
                    to: Tier::Distributed,
                });
            }
        }
        let shared = Arc::new(entry.clone());
        self.insert_memory(entry, now);
        self.observers.emit(CacheEvent::Promoted {
            from,
            to: Tier::Memory,
        });
        shared
    }

    fn insert_memory(&self, entry: CacheEntry, now: i64) {
        for (victim, reason) in self.memory.insert(entry, now) {
            debug!(key = %victim, ?reason, "evicted from L1");
            self.observers.emit(CacheEvent::Evicted {
                tier: Tier::Memory,
                reason,
            });
        }
        self.observers.emit(CacheEvent::Stored { tier: Tier::Memory });
    }

    pub fn set(&self, key: &CacheKey, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.set_scoped(key, value, ttl, None)
    }

    /// Store `value` under `key` in every tier. L1 is written before
    /// returning; L2/L3 writes are queued and their failures are logged and
    /// counted, never returned.
    pub fn set_scoped(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
        scope: Option<&str>,
    ) -> Result<(), CacheError> {
        self.set_in(key, value, ttl, scope, TierSelection::All)
    }

    /// Store `value` only in the selected tiers.
    pub fn set_in(
        &self,
        key: &CacheKey,
        value: Vec<u8>,
        ttl: Duration,
        scope: Option<&str>,
        tiers: TierSelection,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::ZeroTtl(key.clone()));
        }
        let now = now_ms();
        let entry = CacheEntry::new(key.clone(), value, scope.map(str::to_string), now, ttl);
        for remote in self.remotes().filter(|r| tiers.includes(r.tier())) {
            remote.enqueue_put(entry.clone(), now);
        }
        if tiers.includes(Tier::Memory) {
            self.insert_memory(entry, now);
        }
        Ok(())
    }

    /// Typed read. An entry that no longer decodes is dropped and reported as a miss.
    pub fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<(T, Tier)> {
        let hit = self.get(key)?;
        match serde_json::from_slice(hit.value()) {
            Ok(value) => Some((value, hit.tier)),
            Err(err) => {
                warn!(%key, error = %err, "cached value no longer decodes, invalidating");
                self.invalidate(&KeyPattern::Exact(key.clone()), TierSelection::All);
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        scope: Option<&str>,
    ) -> Result<(), CacheError> {
        self.set_json_in(key, value, ttl, scope, TierSelection::All)
    }

    pub fn set_json_in<T: Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: Duration,
        scope: Option<&str>,
        tiers: TierSelection,
    ) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|source| CacheError::Codec {
            key: key.clone(),
            source,
        })?;
        self.set_in(key, bytes, ttl, scope, tiers)
    }

    /// Whether any tier holds a live entry. Does not promote or count as a lookup.
    pub fn contains_fresh(&self, key: &CacheKey) -> bool {
        let now = now_ms();
        if self.memory.contains_fresh(key, now) {
            return true;
        }
        self.remotes().any(|remote| {
            remote
                .get(key)
                .is_some_and(|entry| !entry.is_expired_at(now))
        })
    }

    /// Remove matching entries from the selected tiers. L1 is synchronous;
    /// L2/L3 removals queue behind pending writes.
    pub fn invalidate(&self, pattern: &KeyPattern, tiers: TierSelection) -> InvalidationReport {
        let mut report = InvalidationReport::default();
        if tiers.includes(Tier::Memory) {
            report.memory_removed = self.memory.remove_matching(pattern);
            self.observers.emit(CacheEvent::Invalidated {
                tier: Tier::Memory,
                count: report.memory_removed,
            });
        }
        for remote in self.remotes() {
            if tiers.includes(remote.tier()) {
                remote.enqueue(WriteOp::Invalidate(pattern.clone()));
                report.queued.push(remote.tier());
            }
        }
        debug!(?pattern, ?tiers, memory_removed = report.memory_removed, "invalidation");
        report
    }

    /// Sweep L1 now and queue an L3 prune. Returns the L1 count.
    pub fn prune_expired(&self) -> usize {
        let removed = sweep(&self.memory, &self.observers);
        if let Some(l3) = &self.durable {
            l3.enqueue(WriteOp::Prune);
        }
        removed
    }

    /// Block until both write-behind queues have drained.
    pub fn flush(&self) {
        for remote in self.remotes() {
            remote.flush();
        }
    }

    /// Stop the sweeper, drain the write-behind queues and join their workers.
    pub fn shutdown(&self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        for remote in self.remotes() {
            remote.shutdown();
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(SnapshotInput {
            memory_len: self.memory.len(),
            memory_capacity: self.memory.capacity(),
            distributed_enabled: self.distributed.is_some(),
            durable_enabled: self.durable.is_some(),
            now_ms: now_ms(),
        })
    }

    pub fn has_tier(&self, tier: Tier) -> bool {
        match tier {
            Tier::Memory => true,
            Tier::Distributed => self.distributed.is_some(),
            Tier::Durable => self.durable.is_some(),
        }
    }

    pub fn is_tier_down(&self, tier: Tier) -> bool {
        match tier {
            Tier::Memory => false,
            Tier::Distributed => self.distributed.as_ref().is_some_and(RemoteTier::is_down),
            Tier::Durable => self.durable.as_ref().is_some_and(RemoteTier::is_down),
        }
    }
}

impl Drop for TieredCache {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
    }
}

fn sweep(memory: &MemoryTier, observers: &Observers) -> usize {
    let removed = memory.sweep_expired(now_ms());
    for _ in 0..removed {
        observers.emit(CacheEvent::Evicted {
            tier: Tier::Memory,
            reason: EvictionReason::Expired,
        });
    }
    if removed > 0 {
        debug!(removed, "swept expired L1 entries");
    }
    removed
}

/// Background L1 sweep on a fixed interval, independent of access.
struct Sweeper {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    fn spawn(
        memory: Weak<MemoryTier>,
        observers: Observers,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let (stop, stop_rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("quotecache-sweeper".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => match memory.upgrade() {
                        Some(memory) => {
                            sweep(&memory, &observers);
                        }
                        None => break,
                    },
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })?;
        Ok(Self { stop, handle })
    }

    fn stop(self) {
        let _ = self.stop.send(());
        if self.handle.join().is_err() {
            warn!("L1 sweeper panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::CacheKeyBuilder;

    fn key(n: i64) -> CacheKey {
        CacheKeyBuilder::new("t").param("n", n).build().unwrap()
    }

    fn memory_only() -> TieredCache {
        TieredCache::in_memory(TieredCacheConfig {
            memory: MemoryTierConfig {
                capacity: 8,
                shards: 1,
                max_ttl: None,
            },
            sweep_interval: None,
            ..TieredCacheConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn zero_ttl_is_a_caller_error() {
        let cache = memory_only();
        assert!(matches!(
            cache.set(&key(1), vec![1], Duration::ZERO),
            Err(CacheError::ZeroTtl(_))
        ));
    }

    #[test]
    fn sub_millisecond_ttl_is_still_readable() {
        let cache = memory_only();
        cache.set(&key(1), vec![1], Duration::from_micros(900)).unwrap();
        let hit = cache.get(&key(1)).unwrap();
        assert_eq!(hit.value(), &[1]);
    }

    #[test]
    fn set_then_get_hits_l1() {
        let cache = memory_only();
        cache.set(&key(1), vec![7], Duration::from_secs(60)).unwrap();
        let hit = cache.get(&key(1)).unwrap();
        assert_eq!(hit.tier, Tier::Memory);
        assert_eq!(hit.value(), &[7]);
    }

    #[test]
    fn json_round_trip_and_scope() {
        let cache = memory_only();
        cache
            .set_json(&key(1), &vec![1.5, 2.5], Duration::from_secs(60), Some("AAPL"))
            .unwrap();
        let (value, tier): (Vec<f64>, Tier) = cache.get_json(&key(1)).unwrap();
        assert_eq!(value, vec![1.5, 2.5]);
        assert_eq!(tier, Tier::Memory);
        let report = cache.invalidate(&KeyPattern::Scope("AAPL".into()), TierSelection::All);
        assert_eq!(report.memory_removed, 1);
        assert!(report.queued.is_empty());
    }

    #[test]
    fn undecodable_value_is_a_miss() {
        let cache = memory_only();
        cache.set(&key(1), b"not json".to_vec(), Duration::from_secs(60)).unwrap();
        assert!(cache.get_json::<Vec<f64>>(&key(1)).is_none());
        assert!(cache.get(&key(1)).is_none());
    }

    #[test]
    fn stats_follow_lookups() {
        let cache = memory_only();
        assert!(cache.get(&key(1)).is_none());
        cache.set(&key(1), vec![1], Duration::from_secs(60)).unwrap();
        assert!(cache.get(&key(1)).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.full_misses, 1);
        assert_eq!(stats.memory_len, 1);
        assert!(stats.distributed.is_none());
    }

    #[test]
    fn sweeper_removes_expired_without_access() {
        let cache = TieredCache::in_memory(TieredCacheConfig {
            sweep_interval: Some(Duration::from_millis(10)),
            ..TieredCacheConfig::default()
        })
        .unwrap();
        cache.set(&key(1), vec![1], Duration::from_millis(5)).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(cache.stats().memory_len, 0);
        assert!(cache.stats().memory.expirations >= 1);
        cache.shutdown();
    }

    #[test]
    fn tier_selection() {
        assert!(TierSelection::All.includes(Tier::Durable));
        assert!(TierSelection::Memory.includes(Tier::Memory));
        assert!(!TierSelection::Memory.includes(Tier::Distributed));
        assert!(TierSelection::MemoryAndDistributed.includes(Tier::Memory));
        assert!(TierSelection::MemoryAndDistributed.includes(Tier::Distributed));
        assert!(!TierSelection::MemoryAndDistributed.includes(Tier::Durable));
    }

    #[test]
    fn set_outside_memory_skips_l1() {
        let cache = memory_only();
        cache
            .set_in(&key(1), vec![1], Duration::from_secs(60), None, TierSelection::Durable)
            .unwrap();
        assert!(cache.get(&key(1)).is_none());
        assert!(matches!(
            cache.set_in(&key(2), vec![1], Duration::ZERO, None, TierSelection::Memory),
            Err(CacheError::ZeroTtl(_))
        ));
    }
}
