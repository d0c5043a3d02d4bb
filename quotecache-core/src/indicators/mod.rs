//! Concrete indicator implementations.
//!
//! Indicators are pure functions: bar history in, a series of the same length
//! out. `None` marks a bar where the indicator is unavailable (warmup, too
//! little data, a NaN input); it is never replaced by a number.
//!
//! Multi-value indicators (MACD, Bollinger, KDJ, ADX) return one struct per bar
//! instead of separate band instances.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod ema;
pub mod kdj;
pub mod macd;
pub mod obv;
pub mod rsi;
pub mod sma;
pub mod vwap;

pub use adx::{Adx, AdxValue};
pub use atr::Atr;
pub use bollinger::{BandValue, Bollinger};
pub use ema::{ema_of_series, Ema};
pub use kdj::{Kdj, KdjValue};
pub use macd::{Macd, MacdValue};
pub use obv::Obv;
pub use rsi::Rsi;
pub use sma::{sma_of_series, Sma};
pub use vwap::Vwap;

use crate::domain::OhlcBar;

/// Trait for indicators.
///
/// `compute` returns one value per bar. The first `lookback()` entries are
/// `None` (warmup).
///
/// # Look-ahead guard
/// No value at bar t may depend on bars after t: computing over a truncated
/// series must reproduce the prefix of the full series.
pub trait Indicator: Send + Sync {
    type Output: Copy;

    /// Human-readable name (e.g., "sma_20", "rsi_14").
    fn name(&self) -> &str;

    /// Index of the first bar that can carry a value.
    fn lookback(&self) -> usize;

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<Self::Output>>;
}

/// Closing prices, with NaN mapped to `None`.
pub(crate) fn closes(bars: &[OhlcBar]) -> Vec<Option<f64>> {
    bars.iter()
        .map(|b| (!b.close.is_nan()).then_some(b.close))
        .collect()
}

/// Create synthetic bars from close prices for testing.
///
/// open = prev_close (or close for the first bar),
/// high = max(open, close) + 1.0, low = min(open, close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_bars(closes: &[f64]) -> Vec<OhlcBar> {
    let base = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            OhlcBar {
                timestamp: base + chrono::Duration::days(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
