//! Store seams for the L2 and L3 tiers, plus an in-process L2 double.
//!
//! `KvStore` is a plain bytes-with-TTL store (the shape of a distributed
//! key-value server). `DurableStore` keeps whole entries and can prune and
//! delete by pattern on its own.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;

use super::entry::CacheEntry;
use crate::key::CacheKey;

/// Tier-internal failure. Never leaves `TieredCache`: it marks the tier down.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store did not answer within {0:?}")]
    Timeout(Duration),

    #[error("corrupt entry: {0}")]
    Corrupt(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which entries an invalidation targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    Exact(CacheKey),
    All,
    /// Every key under one endpoint (e.g. `kline`).
    Endpoint(String),
    /// Every entry scoped to one symbol.
    Scope(String),
}

impl KeyPattern {
    pub fn matches(&self, key: &CacheKey, scope: Option<&str>) -> bool {
        match self {
            KeyPattern::Exact(k) => k == key,
            KeyPattern::All => true,
            KeyPattern::Endpoint(endpoint) => key.endpoint() == endpoint,
            KeyPattern::Scope(symbol) => scope == Some(symbol.as_str()),
        }
    }

    /// Key prefix that narrows a scan, if the pattern has one.
    pub fn prefix(&self) -> String {
        match self {
            KeyPattern::Exact(k) => k.as_str().to_string(),
            KeyPattern::Endpoint(endpoint) => format!("{endpoint}:"),
            KeyPattern::All | KeyPattern::Scope(_) => String::new(),
        }
    }
}

/// L2 seam: a distributed key-value store holding opaque blobs with a TTL.
pub trait KvStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError>;

    /// Returns whether the key existed.
    fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Every live key starting with `prefix` (empty prefix = all keys).
    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// L3 seam: a durable embedded store that keeps whole entries.
pub trait DurableStore: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;

    fn set(&self, entry: &CacheEntry) -> Result<(), StoreError>;

    fn delete(&self, key: &CacheKey) -> Result<bool, StoreError>;

    fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError>;

    /// Remove every entry whose `expires_at <= now_ms`. Returns the count removed.
    fn prune_expired(&self, now_ms: i64) -> Result<usize, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;
}

/// In-process `KvStore` with fault injection, used as an L2 stand-in and test double.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    data: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    gets: AtomicU64,
    sets: AtomicU64,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While unavailable, every call fails with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    /// Delay every call by `latency` (simulates a slow network).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn get_count(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.data.lock().values().filter(|(_, exp)| *exp > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".into()));
        }
        Ok(())
    }
}

impl KvStore for MemoryKvStore {
    fn name(&self) -> &str {
        "memory-kv"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        self.gets.fetch_add(1, Ordering::SeqCst);
        let mut data = self.data.lock();
        match data.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                data.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.data
            .lock()
            .insert(key.to_string(), (value.to_vec(), Instant::now() + ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.data.lock().remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.check()?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .lock()
            .iter()
            .filter(|(k, (_, exp))| k.starts_with(prefix) && *exp > now)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
