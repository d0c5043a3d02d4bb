//! Integration tests for the rate-limited preloader.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use quotecache_core::cache::{TieredCache, TieredCacheConfig};
use quotecache_core::data::{generate_synthetic_bars, DataError, MarketDataSource};
use quotecache_core::domain::{Granularity, OhlcBar};
use quotecache_core::preload::{
    NoProgress, PairOutcome, PreloadConfig, PreloadRequest, Preloader,
};

/// Synthetic bars, except for a few symbols that fail in known ways.
struct ScriptedSource {
    fetches: AtomicUsize,
}

impl MarketDataSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<OhlcBar>, DataError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        match symbol {
            "DOWN" => Err(DataError::NetworkUnreachable("connection reset".into())),
            "GONE" => Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            }),
            "SLOW" => {
                std::thread::sleep(Duration::from_millis(300));
                Ok(generate_synthetic_bars(symbol, start, end, granularity))
            }
            _ => Ok(generate_synthetic_bars(symbol, start, end, granularity)),
        }
    }
}

fn request(symbols: Vec<String>) -> PreloadRequest {
    PreloadRequest {
        symbols,
        lookback_days: 20,
        granularities: vec![Granularity::Day],
        as_of: NaiveDate::from_ymd_opt(2024, 5, 31).unwrap(),
    }
}

fn preloader(config: PreloadConfig) -> (Arc<ScriptedSource>, Preloader) {
    let cache = Arc::new(TieredCache::in_memory(TieredCacheConfig::default()).unwrap());
    let source = Arc::new(ScriptedSource {
        fetches: AtomicUsize::new(0),
    });
    let preloader = Preloader::new(cache, source.clone(), config).unwrap();
    (source, preloader)
}

#[test]
fn n_symbols_under_r_per_window_use_ceil_n_over_r_windows() {
    const N: usize = 25;
    const R: u32 = 10;
    let window = Duration::from_millis(80);
    let (source, preloader) = preloader(PreloadConfig {
        workers: 4,
        requests_per_window: R,
        window,
        ..PreloadConfig::default()
    });
    let symbols = (0..N).map(|i| format!("SYM{i:02}")).collect();

    let report = preloader.run(&request(symbols), &NoProgress);

    assert_eq!(report.windows_used, N.div_ceil(R as usize) as u64);
    assert_eq!(report.succeeded, N);
    assert_eq!(report.pairs.len(), N);
    assert_eq!(source.fetches.load(Ordering::SeqCst), N);
    assert!(report.elapsed >= window * 2);
    for window_ordinal in 1..=3u64 {
        let in_window = report
            .pairs
            .iter()
            .filter(|p| p.window == Some(window_ordinal))
            .count();
        assert!(in_window <= R as usize);
    }
}

#[test]
fn failures_are_recorded_per_pair() {
    let (_, preloader) = preloader(PreloadConfig::default());
    let symbols = ["SPY", "DOWN", "GONE"].map(String::from).to_vec();
    let report = preloader.run(&request(symbols), &NoProgress);

    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 2);
    assert!(!report.all_succeeded());

    let outcome = |symbol: &str| {
        report
            .pairs
            .iter()
            .find(|p| p.symbol == symbol)
            .map(|p| p.outcome.clone())
            .unwrap()
    };
    assert!(matches!(outcome("SPY"), PairOutcome::Loaded { bars } if bars > 0));
    assert!(matches!(outcome("DOWN"), PairOutcome::Failed { retryable: true, .. }));
    assert!(matches!(outcome("GONE"), PairOutcome::Failed { retryable: false, .. }));
}

#[test]
fn fetch_timeout_is_a_retryable_failure() {
    let (_, preloader) = preloader(PreloadConfig {
        fetch_timeout: Duration::from_millis(30),
        ..PreloadConfig::default()
    });
    let report = preloader.run(&request(vec!["SLOW".into()]), &NoProgress);
    assert_eq!(report.failed, 1);
    match &report.pairs[0].outcome {
        PairOutcome::Failed { error, retryable } => {
            assert!(*retryable);
            assert!(error.contains("did not answer"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}

#[test]
fn multiple_granularities_are_separate_pairs() {
    let (source, preloader) = preloader(PreloadConfig::default());
    let mut req = request(vec!["SPY".into()]);
    req.granularities = vec![Granularity::Day, Granularity::Week];
    let report = preloader.run(&req, &NoProgress);
    assert_eq!(report.pairs.len(), 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(source.fetches.load(Ordering::SeqCst), 2);
}
