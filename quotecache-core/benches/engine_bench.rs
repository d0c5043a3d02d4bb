//! Criterion benchmarks for QuoteCache hot paths.
//!
//! Benchmarks:
//! 1. Full analysis (every indicator) over series of increasing length
//! 2. Single indicators (SMA, MACD, RSI, KDJ)
//! 3. Cache key building
//! 4. L1 set/get round trip

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use quotecache_core::analysis::{AnalysisRequest, IndicatorEngine};
use quotecache_core::cache::{TieredCache, TieredCacheConfig};
use quotecache_core::data::generate_synthetic_bars;
use quotecache_core::domain::{BarsQuery, Granularity, OhlcBar};
use quotecache_core::indicators::{Indicator, Kdj, Macd, Rsi, Sma};
use quotecache_core::key::CacheKeyBuilder;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_bars(n: usize) -> Vec<OhlcBar> {
    let start = chrono::NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
    // Weekdays only: ~1.4 calendar days per bar.
    let end = start + chrono::Duration::days((n as f64 * 1.45) as i64);
    let mut bars = generate_synthetic_bars("BENCH", start, end, Granularity::Day);
    bars.truncate(n);
    bars
}

// ── 1. Full analysis ─────────────────────────────────────────────────

fn bench_engine(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_all_indicators");
    let engine = IndicatorEngine::new();
    let request = AnalysisRequest::all();
    for n in [250, 1_000, 5_000] {
        let bars = make_bars(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &bars, |b, bars| {
            b.iter(|| engine.compute(black_box(bars), &request).unwrap())
        });
    }
    group.finish();
}

// ── 2. Single indicators ─────────────────────────────────────────────

fn bench_indicators(c: &mut Criterion) {
    let bars = make_bars(5_000);
    let mut group = c.benchmark_group("indicators_5000");
    group.bench_function("sma_20", |b| b.iter(|| Sma::new(20).compute(black_box(&bars))));
    group.bench_function("macd_12_26_9", |b| {
        b.iter(|| Macd::new(12, 26, 9).compute(black_box(&bars)))
    });
    group.bench_function("rsi_14", |b| b.iter(|| Rsi::new(14).compute(black_box(&bars))));
    group.bench_function("kdj_9_3_3", |b| {
        b.iter(|| Kdj::new(9, 3, 3).compute(black_box(&bars)))
    });
    group.finish();
}

// ── 3. Keys ──────────────────────────────────────────────────────────

fn bench_keys(c: &mut Criterion) {
    let day = chrono::NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    c.bench_function("bars_query_key", |b| {
        b.iter(|| {
            BarsQuery::new(black_box("AAPL"), Granularity::Day, day, day)
                .cache_key()
                .unwrap()
        })
    });
    c.bench_function("analysis_style_key", |b| {
        b.iter(|| {
            CacheKeyBuilder::new("analysis")
                .param("symbol", black_box("AAPL"))
                .set("kinds", ["rsi", "macd", "kdj", "bollinger"])
                .set("ma_windows", [5usize, 10, 20, 30, 60])
                .param("bollinger_k", 2.0)
                .build()
                .unwrap()
        })
    });
}

// ── 4. L1 round trip ─────────────────────────────────────────────────

fn bench_memory_tier(c: &mut Criterion) {
    let cache = TieredCache::in_memory(TieredCacheConfig {
        sweep_interval: None,
        ..TieredCacheConfig::default()
    })
    .unwrap();
    let keys: Vec<_> = (0..512i64)
        .map(|i| CacheKeyBuilder::new("bench").param("i", i).build().unwrap())
        .collect();
    let payload = vec![0u8; 4096];
    c.bench_function("l1_set_get_512", |b| {
        b.iter(|| {
            for key in &keys {
                cache.set(key, payload.clone(), Duration::from_secs(60)).unwrap();
                black_box(cache.get(key));
            }
        })
    });
}

criterion_group!(
    benches,
    bench_engine,
    bench_indicators,
    bench_keys,
    bench_memory_tier
);
criterion_main!(benches);
