//! Cache statistics, health diagnostics and recommendations.
//!
//! `CacheStatsCollector` is a passive observer: it only counts events. The
//! health status and the recommendations are pure functions of a snapshot.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::entry::Tier;
use super::events::{CacheEvent, CacheObserver, EvictionReason};

#[derive(Debug, Clone)]
pub struct StatsConfig {
    /// An unreachable L2 or L3 only degrades health after this long.
    pub grace_period: Duration,
    /// L1 occupancy above this ratio degrades health.
    pub degraded_occupancy: f64,
    /// Lookups needed before the hit ratio is judged.
    pub min_sample: u64,
    /// Hit ratio below this triggers an efficiency recommendation.
    pub low_hit_ratio: f64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(60),
            degraded_occupancy: 0.9,
            min_sample: 100,
            low_hit_ratio: 0.5,
        }
    }
}

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    promotions: AtomicU64,
    write_failures: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierStats {
        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            reachable: true,
            unreachable_for_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationCategory {
    Capacity,
    Connectivity,
    Efficiency,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub category: RecommendationCategory,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    /// Entries promoted into this tier.
    pub promotions: u64,
    pub write_failures: u64,
    pub reachable: bool,
    pub unreachable_for_ms: Option<u64>,
}

/// Point-in-time view of the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub memory: TierStats,
    /// `None` when the tier is not configured.
    pub distributed: Option<TierStats>,
    pub durable: Option<TierStats>,
    pub memory_len: usize,
    pub memory_capacity: usize,
    pub occupancy: f64,
    pub hits: u64,
    pub full_misses: u64,
    /// `None` before the first lookup.
    pub hit_ratio: Option<f64>,
    pub health_status: HealthStatus,
    pub recommendations: Vec<Recommendation>,
}

impl CacheStats {
    pub fn lookups(&self) -> u64 {
        self.hits + self.full_misses
    }
}

/// What the collector cannot observe from events alone.
#[derive(Debug, Clone, Copy)]
pub struct SnapshotInput {
    pub memory_len: usize,
    pub memory_capacity: usize,
    pub distributed_enabled: bool,
    pub durable_enabled: bool,
    pub now_ms: i64,
}

/// Counts cache events with atomics.
#[derive(Debug, Default)]
pub struct CacheStatsCollector {
    config: StatsConfig,
    memory: TierCounters,
    distributed: TierCounters,
    durable: TierCounters,
    full_misses: AtomicU64,
    outages: Mutex<BTreeMap<Tier, i64>>,
}

impl CacheStatsCollector {
    pub fn new(config: StatsConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    fn counters(&self, tier: Tier) -> &TierCounters {
        match tier {
            Tier::Memory => &self.memory,
            Tier::Distributed => &self.distributed,
            Tier::Durable => &self.durable,
        }
    }

    pub fn snapshot(&self, input: SnapshotInput) -> CacheStats {
        let outages = self.outages.lock().clone();
        let remote = |tier: Tier, enabled: bool| {
            enabled.then(|| {
                let mut stats = self.counters(tier).snapshot();
                if let Some(since) = outages.get(&tier) {
                    stats.reachable = false;
                    stats.unreachable_for_ms = Some(input.now_ms.saturating_sub(*since).max(0) as u64);
                }
                stats
            })
        };
        let memory = self.memory.snapshot();
        let distributed = remote(Tier::Distributed, input.distributed_enabled);
        let durable = remote(Tier::Durable, input.durable_enabled);

        let hits = memory.hits
            + distributed.as_ref().map_or(0, |s| s.hits)
            + durable.as_ref().map_or(0, |s| s.hits);
        let full_misses = self.full_misses.load(Ordering::Relaxed);
        let lookups = hits + full_misses;
        let occupancy = if input.memory_capacity == 0 {
            0.0
        } else {
            input.memory_len as f64 / input.memory_capacity as f64
        };

        let mut stats = CacheStats {
            memory,
            distributed,
            durable,
            memory_len: input.memory_len,
            memory_capacity: input.memory_capacity,
            occupancy,
            hits,
            full_misses,
            hit_ratio: (lookups > 0).then(|| hits as f64 / lookups as f64),
            health_status: HealthStatus::Healthy,
            recommendations: Vec::new(),
        };
        stats.health_status = evaluate_health(&stats, &self.config);
        stats.recommendations = recommendations(&stats, &self.config);
        stats
    }
}

impl CacheObserver for CacheStatsCollector {
    fn on_event(&self, event: &CacheEvent) {
        match *event {
            CacheEvent::Hit { tier } => {
                self.counters(tier).hits.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Miss { tier } => {
                self.counters(tier).misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::FullMiss => {
                self.full_misses.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Promoted { to, .. } => {
                self.counters(to).promotions.fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::Evicted { tier, reason } => {
                let counters = self.counters(tier);
                match reason {
                    EvictionReason::Capacity => counters.evictions.fetch_add(1, Ordering::Relaxed),
                    EvictionReason::Expired => counters.expirations.fetch_add(1, Ordering::Relaxed),
                };
            }
            CacheEvent::WriteFailed { tier } => {
                self.counters(tier)
                    .write_failures
                    .fetch_add(1, Ordering::Relaxed);
            }
            CacheEvent::TierDown { tier, at_ms } => {
                self.outages.lock().entry(tier).or_insert(at_ms);
            }
            CacheEvent::TierUp { tier } => {
                self.outages.lock().remove(&tier);
            }
            CacheEvent::Stored { .. } | CacheEvent::Invalidated { .. } => {}
        }
    }
}

fn down_for(stats: &Option<TierStats>) -> Option<Duration> {
    stats
        .as_ref()
        .filter(|s| !s.reachable)
        .map(|s| Duration::from_millis(s.unreachable_for_ms.unwrap_or(0)))
}

/// Critical when both remote tiers are configured and unreachable (no grace);
/// degraded on high L1 occupancy or a remote tier down past the grace period.
pub fn evaluate_health(stats: &CacheStats, config: &StatsConfig) -> HealthStatus {
    let l2_down = down_for(&stats.distributed);
    let l3_down = down_for(&stats.durable);
    if l2_down.is_some() && l3_down.is_some() {
        return HealthStatus::Critical;
    }
    let past_grace = [l2_down, l3_down]
        .into_iter()
        .flatten()
        .any(|down| down > config.grace_period);
    if stats.occupancy > config.degraded_occupancy || past_grace {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

/// Ordered rules; the first match in each category wins.
pub fn recommendations(stats: &CacheStats, config: &StatsConfig) -> Vec<Recommendation> {
    let mut out = Vec::new();

    let capacity = if stats.occupancy > config.degraded_occupancy {
        Some(format!(
            "L1 occupancy at {:.0}%: raise memory capacity or clear stale entries",
            stats.occupancy * 100.0
        ))
    } else if stats.memory.evictions > stats.memory.hits && stats.memory.evictions > 0 {
        Some("L1 evicts more entries than it serves: raise memory capacity".to_string())
    } else {
        None
    };
    if let Some(message) = capacity {
        out.push(Recommendation {
            category: RecommendationCategory::Capacity,
            message,
        });
    }

    let l2_down = down_for(&stats.distributed);
    let l3_down = down_for(&stats.durable);
    let write_failures = stats.distributed.as_ref().map_or(0, |s| s.write_failures)
        + stats.durable.as_ref().map_or(0, |s| s.write_failures);
    let connectivity = match (l2_down, l3_down) {
        (Some(_), Some(_)) => Some(
            "L2 and L3 unreachable: serving from memory and the source only; check the \
             distributed store connection and the durable store path"
                .to_string(),
        ),
        (Some(down), None) => Some(format!(
            "L2 unreachable for {}s: check the distributed store connection",
            down.as_secs()
        )),
        (None, Some(down)) => Some(format!(
            "L3 unreachable for {}s: check the durable store path and disk",
            down.as_secs()
        )),
        (None, None) if write_failures > 0 => Some(format!(
            "{write_failures} write-behind failures recorded: check tier latency"
        )),
        (None, None) => None,
    };
    if let Some(message) = connectivity {
        out.push(Recommendation {
            category: RecommendationCategory::Connectivity,
            message,
        });
    }

    if let Some(ratio) = stats.hit_ratio {
        if stats.lookups() >= config.min_sample && ratio < config.low_hit_ratio {
            out.push(Recommendation {
                category: RecommendationCategory::Efficiency,
                message: format!(
                    "hit ratio {:.0}% over {} lookups: preload frequently requested symbols or raise TTLs",
                    ratio * 100.0,
                    stats.lookups()
                ),
            });
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(len: usize, capacity: usize) -> SnapshotInput {
        SnapshotInput {
            memory_len: len,
            memory_capacity: capacity,
            distributed_enabled: true,
            durable_enabled: true,
            now_ms: 100_000,
        }
    }

    #[test]
    fn counts_hits_and_misses() {
        let c = CacheStatsCollector::new(StatsConfig::default());
        c.on_event(&CacheEvent::Hit { tier: Tier::Memory });
        c.on_event(&CacheEvent::Hit { tier: Tier::Durable });
        c.on_event(&CacheEvent::Miss { tier: Tier::Memory });
        c.on_event(&CacheEvent::FullMiss);
        let s = c.snapshot(input(0, 10));
        assert_eq!(s.memory.hits, 1);
        assert_eq!(s.memory.misses, 1);
        assert_eq!(s.durable.as_ref().unwrap().hits, 1);
        assert_eq!(s.hits, 2);
        assert_eq!(s.full_misses, 1);
        assert!((s.hit_ratio.unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_collector_is_healthy() {
        let c = CacheStatsCollector::new(StatsConfig::default());
        let s = c.snapshot(input(0, 10));
        assert_eq!(s.health_status, HealthStatus::Healthy);
        assert_eq!(s.hit_ratio, None);
        assert!(s.recommendations.is_empty());
    }

    #[test]
    fn high_occupancy_degrades() {
        let c = CacheStatsCollector::new(StatsConfig::default());
        let s = c.snapshot(input(95, 100));
        assert_eq!(s.health_status, HealthStatus::Degraded);
        assert_eq!(s.recommendations[0].category, RecommendationCategory::Capacity);
    }

    #[test]
    fn outage_within_grace_is_healthy_then_degraded() {
        let c = CacheStatsCollector::new(StatsConfig {
            grace_period: Duration::from_secs(30),
            ..StatsConfig::default()
        });
        c.on_event(&CacheEvent::TierDown {
            tier: Tier::Distributed,
            at_ms: 90_000,
        });
        let s = c.snapshot(input(0, 10));
        assert!(!s.distributed.as_ref().unwrap().reachable);
        assert_eq!(s.health_status, HealthStatus::Healthy);
        // Still reported as a connectivity problem.
        assert_eq!(
            s.recommendations[0].category,
            RecommendationCategory::Connectivity
        );

        let later = SnapshotInput {
            now_ms: 200_000,
            ..input(0, 10)
        };
        assert_eq!(c.snapshot(later).health_status, HealthStatus::Degraded);

        c.on_event(&CacheEvent::TierUp {
            tier: Tier::Distributed,
        });
        assert_eq!(c.snapshot(later).health_status, HealthStatus::Healthy);
    }

    #[test]
    fn both_remote_tiers_down_is_critical_immediately() {
        let c = CacheStatsCollector::new(StatsConfig::default());
        for tier in [Tier::Distributed, Tier::Durable] {
            c.on_event(&CacheEvent::TierDown {
                tier,
                at_ms: 100_000,
            });
        }
        let s = c.snapshot(input(0, 10));
        assert_eq!(s.health_status, HealthStatus::Critical);
        assert!(s.recommendations[0].message.contains("L2 and L3"));
    }

    #[test]
    fn disabled_tier_never_counts_as_down() {
        let c = CacheStatsCollector::new(StatsConfig::default());
        c.on_event(&CacheEvent::TierDown {
            tier: Tier::Durable,
            at_ms: 0,
        });
        let s = c.snapshot(SnapshotInput {
            durable_enabled: false,
            ..input(0, 10)
        });
        assert!(s.durable.is_none());
        assert_eq!(s.health_status, HealthStatus::Healthy);
    }

    #[test]
    fn low_hit_ratio_needs_a_sample() {
        let config = StatsConfig {
            min_sample: 10,
            ..StatsConfig::default()
        };
        let c = CacheStatsCollector::new(config);
        for _ in 0..5 {
            c.on_event(&CacheEvent::FullMiss);
        }
        assert!(c.snapshot(input(0, 10)).recommendations.is_empty());
        for _ in 0..5 {
            c.on_event(&CacheEvent::FullMiss);
        }
        let recs = c.snapshot(input(0, 10)).recommendations;
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].category, RecommendationCategory::Efficiency);
    }

    #[test]
    fn first_matching_rule_wins_per_category() {
        let c = CacheStatsCollector::new(StatsConfig::default());
        c.on_event(&CacheEvent::Evicted {
            tier: Tier::Memory,
            reason: EvictionReason::Capacity,
        });
        c.on_event(&CacheEvent::WriteFailed {
            tier: Tier::Durable,
        });
        c.on_event(&CacheEvent::TierDown {
            tier: Tier::Durable,
            at_ms: 100_000,
        });
        let recs = c.snapshot(input(99, 100)).recommendations;
        let capacity: Vec<_> = recs
            .iter()
            .filter(|r| r.category == RecommendationCategory::Capacity)
            .collect();
        let connectivity: Vec<_> = recs
            .iter()
            .filter(|r| r.category == RecommendationCategory::Connectivity)
            .collect();
        assert_eq!(capacity.len(), 1);
        assert!(capacity[0].message.contains("occupancy"));
        assert_eq!(connectivity.len(), 1);
        assert!(connectivity[0].message.starts_with("L3 unreachable"));
    }
}
