//! Bulk cache warming under an upstream rate budget.
//!
//! Every (symbol, granularity) pair is handled independently: skipped when the
//! bars key already holds a live entry, otherwise fetched through the timed
//! source and stored under the same key the request path reads. Fetches share
//! a fixed-window budget; work beyond the budget waits for the next window.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::TieredCache;
use crate::data::{DataError, MarketDataSource, TimedSource};
use crate::deadline::private_pool;
use crate::domain::{BarsQuery, Granularity};

#[derive(Debug, Clone, PartialEq)]
pub struct PreloadConfig {
    pub workers: usize,
    pub requests_per_window: u32,
    pub window: Duration,
    pub fetch_timeout: Duration,
    /// TTL of the preloaded bar entries.
    pub ttl: Duration,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            requests_per_window: 10,
            window: Duration::from_secs(30),
            fetch_timeout: Duration::from_secs(10),
            ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Error)]
pub enum PreloadError {
    #[error("preload needs at least one request per window")]
    ZeroBudget,

    #[error("could not start preload workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Source(#[from] DataError),
}

#[derive(Debug)]
struct BudgetState {
    window_start: Option<Instant>,
    used: u32,
    ordinal: u64,
}

/// Fixed-window request budget shared by all workers.
#[derive(Debug)]
pub struct RateBudget {
    limit: u32,
    window: Duration,
    state: Mutex<BudgetState>,
}

impl RateBudget {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            state: Mutex::new(BudgetState {
                window_start: None,
                used: 0,
                ordinal: 0,
            }),
        }
    }

    /// Take one slot, sleeping until the next window if the current one is
    /// spent. Returns the ordinal of the window the slot belongs to.
    pub fn acquire(&self) -> u64 {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();
                let expired = state
                    .window_start
                    .map_or(true, |start| now.duration_since(start) >= self.window);
                if expired {
                    state.window_start = Some(now);
                    state.used = 0;
                    state.ordinal += 1;
                }
                if state.used < self.limit {
                    state.used += 1;
                    return state.ordinal;
                }
                let elapsed = state
                    .window_start
                    .map_or(Duration::ZERO, |start| now.duration_since(start));
                self.window.saturating_sub(elapsed)
            };
            debug!(?wait, "rate budget spent, waiting for next window");
            std::thread::sleep(wait);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadRequest {
    pub symbols: Vec<String>,
    pub lookback_days: u32,
    pub granularities: Vec<Granularity>,
    pub as_of: NaiveDate,
}

impl PreloadRequest {
    /// Distinct (symbol, granularity) pairs in a stable order.
    pub fn pairs(&self) -> Vec<(String, Granularity)> {
        let symbols: BTreeSet<String> = self
            .symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        let granularities: BTreeSet<Granularity> = self.granularities.iter().copied().collect();
        symbols
            .iter()
            .flat_map(|s| granularities.iter().map(move |g| (s.clone(), *g)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairOutcome {
    Loaded { bars: usize },
    Skipped,
    Failed { error: String, retryable: bool },
}

fn failed(error: &impl std::fmt::Display, retryable: bool) -> PairOutcome {
    PairOutcome::Failed {
        error: error.to_string(),
        retryable,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairReport {
    pub symbol: String,
    pub granularity: Granularity,
    #[serde(flatten)]
    pub outcome: PairOutcome,
    /// Rate window the fetch ran in; `None` when nothing was fetched.
    pub window: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreloadReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pairs: Vec<PairReport>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub windows_used: u64,
}

impl PreloadReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Progress callback for preload runs. Called from worker threads.
pub trait PreloadProgress: Send + Sync {
    fn on_start(&self, symbol: &str, granularity: Granularity, total: usize);

    fn on_complete(&self, report: &PairReport, total: usize);

    fn on_batch_complete(&self, report: &PreloadReport);
}

/// Discards progress.
pub struct NoProgress;

impl PreloadProgress for NoProgress {
    fn on_start(&self, _symbol: &str, _granularity: Granularity, _total: usize) {}

    fn on_complete(&self, _report: &PairReport, _total: usize) {}

    fn on_batch_complete(&self, _report: &PreloadReport) {}
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl PreloadProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, granularity: Granularity, total: usize) {
        println!("[{total} pairs] Fetching {symbol} {granularity}...");
    }

    fn on_complete(&self, report: &PairReport, _total: usize) {
        let (symbol, g) = (&report.symbol, report.granularity);
        match &report.outcome {
            PairOutcome::Loaded { bars } => println!("  OK: {symbol} {g} ({bars} bars)"),
            PairOutcome::Skipped => println!("  CACHED: {symbol} {g}"),
            PairOutcome::Failed { error, .. } => println!("  FAIL: {symbol} {g}: {error}"),
        }
    }

    fn on_batch_complete(&self, report: &PreloadReport) {
        println!(
            "\nPreload complete: {} loaded, {} cached, {} failed in {:.1}s ({} rate windows)",
            report.succeeded,
            report.skipped,
            report.failed,
            report.elapsed.as_secs_f64(),
            report.windows_used
        );
    }
}

pub struct Preloader {
    cache: Arc<TieredCache>,
    source: TimedSource,
    pool: rayon::ThreadPool,
    budget: RateBudget,
    ttl: Duration,
}

impl Preloader {
    pub fn new(
        cache: Arc<TieredCache>,
        source: Arc<dyn MarketDataSource>,
        config: PreloadConfig,
    ) -> Result<Self, PreloadError> {
        if config.requests_per_window == 0 {
            return Err(PreloadError::ZeroBudget);
        }
        let workers = config.workers.max(1);
        Ok(Self {
            cache,
            source: TimedSource::new(source, config.fetch_timeout, workers)?,
            pool: private_pool(workers, "quotecache-preload")?,
            budget: RateBudget::new(config.requests_per_window, config.window),
            ttl: config.ttl,
        })
    }

    pub fn run(&self, request: &PreloadRequest, progress: &dyn PreloadProgress) -> PreloadReport {
        let started = Instant::now();
        let pairs = request.pairs();
        let total = pairs.len();
        info!(
            pairs = total,
            source = self.source.name(),
            lookback_days = request.lookback_days,
            "preload started"
        );

        let results: Vec<PairReport> = self.pool.install(|| {
            pairs
                .par_iter()
                .map(|(symbol, granularity)| {
                    progress.on_start(symbol, *granularity, total);
                    let report = self.preload_pair(symbol, *granularity, request);
                    progress.on_complete(&report, total);
                    report
                })
                .collect()
        });

        let count = |f: fn(&PairOutcome) -> bool| results.iter().filter(|r| f(&r.outcome)).count();
        let windows: BTreeSet<u64> = results.iter().filter_map(|r| r.window).collect();
        let report = PreloadReport {
            succeeded: count(|o| matches!(o, PairOutcome::Loaded { .. })),
            failed: count(|o| matches!(o, PairOutcome::Failed { .. })),
            skipped: count(|o| matches!(o, PairOutcome::Skipped)),
            windows_used: windows.len() as u64,
            pairs: results,
            elapsed: started.elapsed(),
        };
        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            windows = report.windows_used,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "preload finished"
        );
        progress.on_batch_complete(&report);
        report
    }

    fn preload_pair(
        &self,
        symbol: &str,
        granularity: Granularity,
        request: &PreloadRequest,
    ) -> PairReport {
        let query = BarsQuery::lookback(symbol, granularity, request.as_of, request.lookback_days);
        let report = |outcome, window| PairReport {
            symbol: query.symbol.clone(),
            granularity,
            outcome,
            window,
        };
        let key = match query.cache_key() {
            Ok(key) => key,
            Err(e) => return report(failed(&e, false), None),
        };
        if self.cache.contains_fresh(&key) {
            debug!(%key, symbol, %granularity, "already cached");
            return report(PairOutcome::Skipped, None);
        }
        if !self.source.is_available() {
            let err = DataError::CircuitBreakerTripped;
            return report(failed(&err, err.is_retryable()), None);
        }

        let window = self.budget.acquire();
        let outcome = match self.source.fetch(&query) {
            Ok(bars) if bars.is_empty() => {
                let err = DataError::EmptyResult {
                    symbol: query.symbol.clone(),
                };
                failed(&err, err.is_retryable())
            }
            Ok(bars) => match self
                .cache
                .set_json(&key, &bars, self.ttl, Some(query.symbol.as_str()))
            {
                Ok(()) => PairOutcome::Loaded { bars: bars.len() },
                Err(e) => failed(&e, false),
            },
            Err(e) => {
                warn!(symbol, %granularity, error = %e, "preload fetch failed");
                failed(&e, e.is_retryable())
            }
        };
        report(outcome, Some(window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TieredCacheConfig;
    use crate::data::SyntheticSource;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn request(symbols: &[&str]) -> PreloadRequest {
        PreloadRequest {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            lookback_days: 30,
            granularities: vec![Granularity::Day],
            as_of: date(2024, 3, 29),
        }
    }

    fn preloader(config: PreloadConfig) -> (Arc<TieredCache>, Preloader) {
        let cache = Arc::new(TieredCache::in_memory(TieredCacheConfig::default()).unwrap());
        let preloader =
            Preloader::new(Arc::clone(&cache), Arc::new(SyntheticSource::new()), config).unwrap();
        (cache, preloader)
    }

    #[test]
    fn pairs_are_deduped_and_normalized() {
        let mut req = request(&["spy", "SPY", " qqq "]);
        req.granularities = vec![Granularity::Day, Granularity::Week, Granularity::Day];
        let pairs = req.pairs();
        assert_eq!(pairs.len(), 4);
        assert_eq!(pairs[0], ("QQQ".to_string(), Granularity::Day));
    }

    #[test]
    fn second_run_skips_cached_pairs() {
        let (_, preloader) = preloader(PreloadConfig::default());
        let req = request(&["SPY", "QQQ"]);
        let first = preloader.run(&req, &NoProgress);
        assert_eq!(first.succeeded, 2);
        assert_eq!(first.windows_used, 1);

        let second = preloader.run(&req, &NoProgress);
        assert_eq!(second.skipped, 2);
        assert_eq!(second.windows_used, 0);
        assert!(second.pairs.iter().all(|p| p.window.is_none()));
    }

    #[test]
    fn preloaded_bars_are_a_request_path_hit() {
        let (cache, preloader) = preloader(PreloadConfig::default());
        let req = request(&["SPY"]);
        preloader.run(&req, &NoProgress);
        let key = BarsQuery::lookback("SPY", Granularity::Day, req.as_of, 30)
            .cache_key()
            .unwrap();
        let cached: Option<(Vec<crate::domain::OhlcBar>, _)> = cache.get_json(&key);
        assert!(!cached.unwrap().0.is_empty());
    }

    #[test]
    fn empty_result_is_a_failure() {
        let (_, preloader) = preloader(PreloadConfig::default());
        let mut req = request(&["SPY"]);
        // A weekend-only window has no daily bars.
        req.as_of = date(2024, 3, 31);
        req.lookback_days = 1;
        let report = preloader.run(&req, &NoProgress);
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.pairs[0].outcome,
            PairOutcome::Failed { retryable: false, .. }
        ));
    }

    #[test]
    fn budget_counts_windows() {
        let budget = RateBudget::new(2, Duration::from_millis(40));
        let windows: Vec<u64> = (0..5).map(|_| budget.acquire()).collect();
        assert_eq!(windows, vec![1, 1, 2, 2, 3]);
    }

    #[test]
    fn zero_budget_rejected() {
        let cache = Arc::new(TieredCache::in_memory(TieredCacheConfig::default()).unwrap());
        let config = PreloadConfig {
            requests_per_window: 0,
            ..Default::default()
        };
        assert!(matches!(
            Preloader::new(cache, Arc::new(SyntheticSource::new()), config),
            Err(PreloadError::ZeroBudget)
        ));
    }

    #[test]
    fn report_serializes_outcomes_flat() {
        let report = PairReport {
            symbol: "SPY".into(),
            granularity: Granularity::Day,
            outcome: PairOutcome::Loaded { bars: 20 },
            window: Some(1),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"], "loaded");
        assert_eq!(json["bars"], 20);
        assert_eq!(json["granularity"], "1d");
    }
}
