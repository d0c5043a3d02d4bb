//! Property tests for cache-key canonicalization and engine determinism.
//!
//! 1. Parameter insertion order never changes a key
//! 2. Unordered lists are order- and duplicate-insensitive
//! 3. Changing any parameter value changes the key
//! 4. The engine is deterministic and never fabricates values during warmup

use chrono::NaiveDate;
use proptest::prelude::*;
use quotecache_core::analysis::{AnalysisRequest, IndicatorEngine, IndicatorKind, IndicatorOutput};
use quotecache_core::domain::OhlcBar;
use quotecache_core::key::CacheKeyBuilder;

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_params() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..8)
        .prop_map(|m| m.into_iter().collect())
}

fn arb_closes() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(1.0..500.0_f64, 0..90)
}

fn bars(closes: &[f64]) -> Vec<OhlcBar> {
    let base = NaiveDate::from_ymd_opt(2023, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| OhlcBar {
            timestamp: base + chrono::Duration::days(i as i64),
            open: close,
            high: close * 1.01,
            low: close * 0.99,
            close,
            volume: 1_000 + i as u64,
        })
        .collect()
}

// ── 1-3. Key canonicalization ────────────────────────────────────────

proptest! {
    #[test]
    fn insertion_order_does_not_matter(params in arb_params()) {
        let forward = params
            .iter()
            .fold(CacheKeyBuilder::new("kline"), |b, (k, v)| b.param(k.as_str(), *v))
            .build()
            .unwrap();
        let backward = params
            .iter()
            .rev()
            .fold(CacheKeyBuilder::new("kline"), |b, (k, v)| b.param(k.as_str(), *v))
            .build()
            .unwrap();
        prop_assert_eq!(forward, backward);
    }

    #[test]
    fn sets_ignore_order_and_duplicates(mut values in prop::collection::vec(any::<i32>(), 1..20)) {
        let a = CacheKeyBuilder::new("analysis").set("v", values.clone()).build().unwrap();
        values.reverse();
        values.push(values[0]);
        let b = CacheKeyBuilder::new("analysis").set("v", values).build().unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn any_value_change_changes_the_key(params in arb_params(), delta in 1i64..1000) {
        let base = params
            .iter()
            .fold(CacheKeyBuilder::new("kline"), |b, (k, v)| b.param(k.as_str(), *v))
            .build()
            .unwrap();
        let changed = params
            .iter()
            .enumerate()
            .fold(CacheKeyBuilder::new("kline"), |b, (i, (k, v))| {
                let v = if i == 0 { v.wrapping_add(delta) } else { *v };
                b.param(k.as_str(), v)
            })
            .build()
            .unwrap();
        prop_assert_ne!(base, changed);
    }
}

// ── 4. Engine determinism ────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn engine_is_deterministic(closes in arb_closes()) {
        let bars = bars(&closes);
        let engine = IndicatorEngine::new();
        let a = serde_json::to_string(&engine.compute(&bars, &AnalysisRequest::all()).unwrap()).unwrap();
        let b = serde_json::to_string(&engine.compute(&bars, &AnalysisRequest::all()).unwrap()).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn rsi_warmup_is_always_null(closes in arb_closes()) {
        let bars = bars(&closes);
        let summary = IndicatorEngine::new()
            .compute(&bars, &AnalysisRequest::new([IndicatorKind::Rsi]))
            .unwrap();
        let Some(IndicatorOutput::Rsi(rsi)) = summary.output(IndicatorKind::Rsi) else {
            panic!("expected RSI output");
        };
        prop_assert_eq!(rsi.series.len(), bars.len());
        for point in rsi.series.iter().take(14) {
            prop_assert!(point.value.is_none());
        }
        for v in rsi.series.iter().filter_map(|p| p.value) {
            prop_assert!((0.0..=100.0).contains(&v));
        }
    }
}
