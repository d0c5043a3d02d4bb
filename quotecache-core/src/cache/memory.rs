//! L1: bounded in-process memory with LRU + TTL eviction.
//!
//! Keys are spread over shards, each behind a `parking_lot::RwLock`. Readers
//! share the lock and bump recency through an atomic stamp; only inserts,
//! removals and evictions take the write lock. Capacity is enforced per
//! shard, so with more than one shard LRU order is approximate across the
//! whole tier. Shard bounds sum to exactly the configured capacity.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use super::entry::CacheEntry;
use super::events::EvictionReason;
use super::store::KeyPattern;
use crate::key::CacheKey;

#[derive(Debug, Clone)]
pub struct MemoryTierConfig {
    pub capacity: usize,
    pub shards: usize,
    pub max_ttl: Option<Duration>,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            shards: 16,
            max_ttl: None,
        }
    }
}

/// Outcome of an L1 lookup.
#[derive(Debug, Clone)]
pub enum MemoryLookup {
    Hit(Arc<CacheEntry>),
    /// Present but expired; removed during the lookup.
    Expired,
    Absent,
}

struct Slot {
    entry: Arc<CacheEntry>,
    last_access: AtomicU64,
}

type Shard = RwLock<HashMap<CacheKey, Slot>>;

pub struct MemoryTier {
    shards: Vec<Shard>,
    shard_capacities: Vec<usize>,
    capacity: usize,
    max_ttl: Option<Duration>,
    clock: AtomicU64,
}

impl MemoryTier {
    pub fn new(config: &MemoryTierConfig) -> Self {
        let capacity = config.capacity.max(1);
        let shard_count = config.shards.clamp(1, capacity);
        let (base, extra) = (capacity / shard_count, capacity % shard_count);
        Self {
            shards: (0..shard_count).map(|_| RwLock::new(HashMap::new())).collect(),
            shard_capacities: (0..shard_count)
                .map(|i| base + usize::from(i < extra))
                .collect(),
            capacity,
            max_ttl: config.max_ttl,
            clock: AtomicU64::new(0),
        }
    }

    fn shard_index(&self, key: &CacheKey) -> usize {
        (key.shard_hash() % self.shards.len() as u64) as usize
    }

    fn shard(&self, key: &CacheKey) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, key: &CacheKey, now: i64) -> MemoryLookup {
        let shard = self.shard(key);
        {
            let map = shard.read();
            match map.get(key) {
                None => return MemoryLookup::Absent,
                Some(slot) if !slot.entry.is_expired_at(now) => {
                    slot.last_access.store(self.tick(), Ordering::Relaxed);
                    return MemoryLookup::Hit(Arc::clone(&slot.entry));
                }
                Some(_) => {}
            }
        }
        let mut map = shard.write();
        // Re-check: a writer may have replaced the entry between the locks.
        match map.get(key) {
            Some(slot) if slot.entry.is_expired_at(now) => {
                map.remove(key);
                MemoryLookup::Expired
            }
            Some(slot) => {
                slot.last_access.store(self.tick(), Ordering::Relaxed);
                MemoryLookup::Hit(Arc::clone(&slot.entry))
            }
            None => MemoryLookup::Absent,
        }
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains_fresh(&self, key: &CacheKey, now: i64) -> bool {
        self.shard(key)
            .read()
            .get(key)
            .is_some_and(|slot| !slot.entry.is_expired_at(now))
    }

    /// Insert or replace, clamped to the tier's max TTL. Returns what was evicted.
    pub fn insert(&self, mut entry: CacheEntry, now: i64) -> Vec<(CacheKey, EvictionReason)> {
        entry.clamp_ttl(now, self.max_ttl);
        let key = entry.key.clone();
        let slot = Slot {
            entry: Arc::new(entry),
            last_access: AtomicU64::new(self.tick()),
        };

        let mut evicted = Vec::new();
        let index = self.shard_index(&key);
        let bound = self.shard_capacities[index];
        let mut map = self.shards[index].write();
        if map.insert(key.clone(), slot).is_some() {
            return evicted;
        }
        while map.len() > bound {
            let victim = map
                .iter()
                .filter(|(k, _)| **k != key)
                .find(|(_, slot)| slot.entry.is_expired_at(now))
                .map(|(k, _)| (k.clone(), EvictionReason::Expired))
                .or_else(|| {
                    map.iter()
                        .filter(|(k, _)| **k != key)
                        .min_by_key(|(_, slot)| slot.last_access.load(Ordering::Relaxed))
                        .map(|(k, _)| (k.clone(), EvictionReason::Capacity))
                });
            match victim {
                Some((victim_key, reason)) => {
                    map.remove(&victim_key);
                    evicted.push((victim_key, reason));
                }
                None => break,
            }
        }
        evicted
    }

    pub fn remove(&self, key: &CacheKey) -> bool {
        self.shard(key).write().remove(key).is_some()
    }

    pub fn remove_matching(&self, pattern: &KeyPattern) -> usize {
        if let KeyPattern::Exact(key) = pattern {
            return usize::from(self.remove(key));
        }
        self.shards
            .iter()
            .map(|shard| {
                let mut map = shard.write();
                let before = map.len();
                map.retain(|key, slot| !pattern.matches(key, slot.entry.scope.as_deref()));
                before - map.len()
            })
            .sum()
    }

    /// Drop every expired entry. Returns the count removed.
    pub fn sweep_expired(&self, now: i64) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let has_expired = shard
                    .read()
                    .values()
                    .any(|slot| slot.entry.is_expired_at(now));
                if !has_expired {
                    return 0;
                }
                let mut map = shard.write();
                let before = map.len();
                map.retain(|_, slot| !slot.entry.is_expired_at(now));
                before - map.len()
            })
            .sum()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn occupancy(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }
}
