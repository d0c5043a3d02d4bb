//! Cache events and the observer seam.

use std::sync::Arc;

use super::entry::Tier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionReason {
    /// Dropped to make room.
    Capacity,
    /// Removed because its TTL passed.
    Expired,
}

/// Everything the tiered cache reports to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    Hit { tier: Tier },
    Miss { tier: Tier },
    /// No tier held a live entry.
    FullMiss,
    Promoted { from: Tier, to: Tier },
    Stored { tier: Tier },
    Evicted { tier: Tier, reason: EvictionReason },
    Invalidated { tier: Tier, count: usize },
    WriteFailed { tier: Tier },
    TierDown { tier: Tier, at_ms: i64 },
    TierUp { tier: Tier },
}

pub trait CacheObserver: Send + Sync {
    fn on_event(&self, event: &CacheEvent);
}

/// Registered observers, shared with the background workers.
#[derive(Clone, Default)]
pub(crate) struct Observers(Arc<Vec<Arc<dyn CacheObserver>>>);

impl Observers {
    pub(crate) fn new(observers: Vec<Arc<dyn CacheObserver>>) -> Self {
        Self(Arc::new(observers))
    }

    pub(crate) fn emit(&self, event: CacheEvent) {
        for observer in self.0.iter() {
            observer.on_event(&event);
        }
    }
}
