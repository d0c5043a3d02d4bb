//! Exponential Moving Average (EMA).
//!
//! Recursive: EMA[t] = alpha * x[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seed: the SMA of the first `period` values.
//! Lookback: period - 1.

use super::{closes, Indicator};
use crate::domain::OhlcBar;

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "EMA period must be >= 1");
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }
}

impl Indicator for Ema {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        ema_of_series(&closes(bars), self.period)
    }
}

/// EMA over an arbitrary series that may start with `None` (e.g. the MACD line).
///
/// Seeding starts at the first `Some`; a `None` after that makes the rest unavailable.
pub fn ema_of_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut result = vec![None; n];
    if period == 0 {
        return result;
    }
    let Some(first) = values.iter().position(Option::is_some) else {
        return result;
    };
    let seed_end = first + period - 1;
    if seed_end >= n {
        return result;
    }

    let mut sum = 0.0;
    for value in &values[first..=seed_end] {
        match value {
            Some(v) => sum += v,
            None => return result,
        }
    }
    let mut prev = sum / period as f64;
    result[seed_end] = Some(prev);

    let alpha = 2.0 / (period as f64 + 1.0);
    for i in (seed_end + 1)..n {
        let Some(v) = values[i] else {
            return result;
        };
        prev = alpha * v + (1.0 - alpha) * prev;
        result[i] = Some(prev);
    }
    result
}
