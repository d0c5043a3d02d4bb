//! L2/L3 tier handles: timed reads, health tracking and the write-behind worker.
//!
//! Reads run on a shared private rayon pool and are abandoned after the tier
//! timeout. Writes, invalidations and prunes go through one FIFO channel per
//! tier, drained by a dedicated thread, so a later invalidation can never be
//! overtaken by an earlier write.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use super::entry::{now_ms, CacheEntry, Tier};
use super::events::{CacheEvent, Observers};
use super::store::{DurableStore, KeyPattern, KvStore, StoreError};
use crate::deadline::{call_with_timeout, DeadlineError};
use crate::key::CacheKey;

/// Per-tier policy for a distributed or durable tier.
#[derive(Debug, Clone)]
pub struct RemoteTierConfig {
    /// Read timeout; a slower read is a miss and marks the tier down.
    pub timeout: Duration,
    /// Entries written to this tier live at most this long.
    pub max_ttl: Option<Duration>,
    /// Extra attempts after a failed write.
    pub write_retries: u32,
    /// First retry delay, doubled on every further attempt.
    pub retry_backoff: Duration,
    /// How long a tier marked down is left alone before the next probe.
    pub probe_interval: Duration,
}

impl Default for RemoteTierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(250),
            max_ttl: None,
            write_retries: 2,
            retry_backoff: Duration::from_millis(50),
            probe_interval: Duration::from_secs(15),
        }
    }
}

/// Uniform view over the two store seams.
pub(crate) trait TierBackend: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError>;
    fn put(&self, entry: &CacheEntry, now: i64) -> Result<(), StoreError>;
    fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError>;
    fn prune(&self, now: i64) -> Result<usize, StoreError>;
}

pub(crate) struct KvBackend(pub Arc<dyn KvStore>);

impl TierBackend for KvBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        let Some(blob) = self.0.get(key.as_str())? else {
            return Ok(None);
        };
        match CacheEntry::decode(&blob, Tier::Distributed) {
            Ok(entry) => Ok(Some(entry)),
            Err(err) => {
                warn!(%key, error = %err, "dropping undecodable L2 entry");
                self.0.delete(key.as_str())?;
                Ok(None)
            }
        }
    }

    fn put(&self, entry: &CacheEntry, now: i64) -> Result<(), StoreError> {
        match entry.remaining_ttl(now) {
            Some(ttl) => self.0.set(entry.key.as_str(), &entry.encode(), ttl),
            None => Ok(()),
        }
    }

    fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError> {
        if let KeyPattern::Exact(key) = pattern {
            return Ok(usize::from(self.0.delete(key.as_str())?));
        }
        let mut removed = 0;
        for raw in self.0.keys(&pattern.prefix())? {
            let matches = match pattern {
                KeyPattern::Scope(_) => match self.0.get(&raw)? {
                    Some(blob) => CacheEntry::decode(&blob, Tier::Distributed)
                        .map(|e| pattern.matches(&e.key, e.scope.as_deref()))
                        .unwrap_or(false),
                    None => false,
                },
                _ => true,
            };
            if matches && self.0.delete(&raw)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn prune(&self, _now: i64) -> Result<usize, StoreError> {
        // The store expires keys itself.
        Ok(0)
    }
}

pub(crate) struct DurableBackend(pub Arc<dyn DurableStore>);

impl TierBackend for DurableBackend {
    fn get(&self, key: &CacheKey) -> Result<Option<CacheEntry>, StoreError> {
        self.0.get(key)
    }

    fn put(&self, entry: &CacheEntry, now: i64) -> Result<(), StoreError> {
        if entry.is_expired_at(now) {
            return Ok(());
        }
        self.0.set(entry)
    }

    fn delete_matching(&self, pattern: &KeyPattern) -> Result<usize, StoreError> {
        self.0.delete_matching(pattern)
    }

    fn prune(&self, now: i64) -> Result<usize, StoreError> {
        self.0.prune_expired(now)
    }
}

pub(crate) enum WriteOp {
    Put(CacheEntry),
    Invalidate(KeyPattern),
    Prune,
    Flush(Sender<()>),
}

#[derive(Debug, Default)]
struct HealthState {
    down_since: Option<i64>,
    next_probe: Option<Instant>,
}

/// Reachability of one tier. Logs each transition once.
pub(crate) struct TierHealth {
    tier: Tier,
    probe_interval: Duration,
    state: Mutex<HealthState>,
    observers: Observers,
}

impl TierHealth {
    fn new(tier: Tier, probe_interval: Duration, observers: Observers) -> Self {
        Self {
            tier,
            probe_interval,
            state: Mutex::new(HealthState::default()),
            observers,
        }
    }

    /// Whether to touch the tier now. While down, only one call per probe interval passes.
    fn admit(&self) -> bool {
        let mut state = self.state.lock();
        if state.down_since.is_none() {
            return true;
        }
        let now = Instant::now();
        match state.next_probe {
            Some(at) if now < at => false,
            _ => {
                state.next_probe = Some(now + self.probe_interval);
                debug!(tier = %self.tier, "probing unreachable tier");
                true
            }
        }
    }

    fn record_success(&self) {
        let recovered = {
            let mut state = self.state.lock();
            let was_down = state.down_since.take().is_some();
            state.next_probe = None;
            was_down
        };
        if recovered {
            info!(tier = %self.tier, "cache tier reachable again");
            self.observers.emit(CacheEvent::TierUp { tier: self.tier });
        }
    }

    fn record_failure(&self, error: &StoreError) {
        let at_ms = {
            let mut state = self.state.lock();
            if state.down_since.is_some() {
                return;
            }
            let at = now_ms();
            state.down_since = Some(at);
            state.next_probe = Some(Instant::now() + self.probe_interval);
            at
        };
        warn!(
            tier = %self.tier,
            error = %error,
            "cache tier unreachable, treating it as a miss until it recovers"
        );
        self.observers.emit(CacheEvent::TierDown {
            tier: self.tier,
            at_ms,
        });
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.lock().down_since.is_some()
    }
}

/// Handle to one L2 or L3 tier.
pub(crate) struct RemoteTier {
    tier: Tier,
    config: RemoteTierConfig,
    backend: Arc<dyn TierBackend>,
    health: Arc<TierHealth>,
    readers: Arc<rayon::ThreadPool>,
    observers: Observers,
    writer: Mutex<Option<Sender<WriteOp>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RemoteTier {
    pub(crate) fn spawn(
        tier: Tier,
        backend: Arc<dyn TierBackend>,
        config: RemoteTierConfig,
        readers: Arc<rayon::ThreadPool>,
        observers: Observers,
    ) -> std::io::Result<Self> {
        let health = Arc::new(TierHealth::new(
            tier,
            config.probe_interval,
            observers.clone(),
        ));
        let (tx, rx) = mpsc::channel();
        let worker = WriteBehind {
            tier,
            config: config.clone(),
            backend: Arc::clone(&backend),
            health: Arc::clone(&health),
            observers: observers.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("quotecache-{}-writer", tier.label().to_lowercase()))
            .spawn(move || worker.run(rx))?;
        Ok(Self {
            tier,
            config,
            backend,
            health,
            readers,
            observers,
            writer: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        })
    }

    pub(crate) fn tier(&self) -> Tier {
        self.tier
    }

    pub(crate) fn is_down(&self) -> bool {
        self.health.is_down()
    }

    /// Timed read. Any failure is a miss; errors and timeouts mark the tier down.
    pub(crate) fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        if !self.health.admit() {
            return None;
        }
        let backend = Arc::clone(&self.backend);
        let owned = key.clone();
        let result = call_with_timeout(&self.readers, self.config.timeout, move || {
            backend.get(&owned)
        });
        match result {
            Ok(Ok(entry)) => {
                self.health.record_success();
                entry
            }
            Ok(Err(err)) => {
                self.health.record_failure(&err);
                None
            }
            Err(DeadlineError::TimedOut(after)) => {
                self.health.record_failure(&StoreError::Timeout(after));
                None
            }
            Err(DeadlineError::Abandoned) => {
                self.health
                    .record_failure(&StoreError::Unavailable("read panicked".into()));
                None
            }
        }
    }

    /// Queue a write of `entry`, clamped to this tier's max TTL.
    pub(crate) fn enqueue_put(&self, mut entry: CacheEntry, now: i64) {
        entry.clamp_ttl(now, self.config.max_ttl);
        self.enqueue(WriteOp::Put(entry));
    }

    pub(crate) fn enqueue(&self, op: WriteOp) {
        let sent = match self.writer.lock().as_ref() {
            Some(tx) => tx.send(op).is_ok(),
            None => false,
        };
        if !sent {
            debug!(tier = %self.tier, "write-behind worker stopped, dropping operation");
            self.observers
                .emit(CacheEvent::WriteFailed { tier: self.tier });
        }
    }

    /// Block until every operation queued so far has been applied.
    pub(crate) fn flush(&self) {
        let (ack_tx, ack_rx) = mpsc::channel();
        let queued = match self.writer.lock().as_ref() {
            Some(tx) => tx.send(WriteOp::Flush(ack_tx)).is_ok(),
            None => false,
        };
        if queued {
            let _ = ack_rx.recv();
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub(crate) fn shutdown(&self) {
        drop(self.writer.lock().take());
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                warn!(tier = %self.tier, "write-behind worker panicked");
            }
        }
    }
}

struct WriteBehind {
    tier: Tier,
    config: RemoteTierConfig,
    backend: Arc<dyn TierBackend>,
    health: Arc<TierHealth>,
    observers: Observers,
}

impl WriteBehind {
    fn run(self, rx: Receiver<WriteOp>) {
        for op in rx {
            match op {
                WriteOp::Flush(ack) => {
                    let _ = ack.send(());
                }
                WriteOp::Put(entry) => {
                    if entry.is_expired_at(now_ms()) {
                        continue;
                    }
                    if let Some(()) = self.apply(|backend| backend.put(&entry, now_ms())) {
                        self.observers.emit(CacheEvent::Stored { tier: self.tier });
                    }
                }
                WriteOp::Invalidate(pattern) => {
                    if let Some(count) = self.apply(|backend| backend.delete_matching(&pattern)) {
                        debug!(tier = %self.tier, count, "invalidated entries");
                        self.observers.emit(CacheEvent::Invalidated {
                            tier: self.tier,
                            count,
                        });
                    }
                }
                WriteOp::Prune => {
                    if let Some(count) = self.apply(|backend| backend.prune(now_ms())) {
                        debug!(tier = %self.tier, count, "pruned expired entries");
                        for _ in 0..count {
                            self.observers.emit(CacheEvent::Evicted {
                                tier: self.tier,
                                reason: super::events::EvictionReason::Expired,
                            });
                        }
                    }
                }
            }
        }
        debug!(tier = %self.tier, "write-behind worker stopped");
    }

    /// Run `op` with bounded retries. `None` means it was skipped or failed,
    /// which has already been logged and reported.
    fn apply<T>(
        &self,
        mut op: impl FnMut(&dyn TierBackend) -> Result<T, StoreError>,
    ) -> Option<T> {
        if !self.health.admit() {
            self.observers.emit(CacheEvent::WriteFailed { tier: self.tier });
            return None;
        }
        let mut attempt: u32 = 0;
        loop {
            match op(self.backend.as_ref()) {
                Ok(value) => {
                    self.health.record_success();
                    return Some(value);
                }
                Err(err) if attempt < self.config.write_retries => {
                    let delay = self.backoff(attempt);
                    debug!(tier = %self.tier, attempt, error = %err, ?delay, "retrying cache write");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    self.health.record_failure(&err);
                    self.observers.emit(CacheEvent::WriteFailed { tier: self.tier });
                    return None;
                }
            }
        }
    }

    /// Exponential backoff with up to 50% random jitter.
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self
            .config
            .retry_backoff
            .checked_mul(2u32.saturating_pow(attempt.min(16)))
            .unwrap_or(Duration::MAX);
        let jitter_cap = u64::try_from(base.as_millis() / 2).unwrap_or(u64::MAX);
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_cap)
        };
        base.saturating_add(Duration::from_millis(jitter))
    }
}
