//! Simple Moving Average (SMA).
//!
//! Rolling mean of close prices over a lookback window.
//! Lookback: period - 1 (first valid value at index period-1).

use super::{closes, Indicator};
use crate::domain::OhlcBar;

#[derive(Debug, Clone)]
pub struct Sma {
    period: usize,
    name: String,
}

impl Sma {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "SMA period must be >= 1");
        Self {
            period,
            name: format!("sma_{period}"),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Sma {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        sma_of_series(&closes(bars), self.period)
    }
}

/// Rolling mean over an arbitrary series. A window containing `None` is `None`.
pub fn sma_of_series(values: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    let n = values.len();
    let mut result = vec![None; n];
    if period == 0 || n < period {
        return result;
    }

    let mut sum = 0.0;
    let mut missing = 0usize;
    for (i, value) in values.iter().enumerate() {
        match value {
            Some(v) => sum += v,
            None => missing += 1,
        }
        if i >= period {
            match values[i - period] {
                Some(v) => sum -= v,
                None => missing -= 1,
            }
        }
        if i + 1 >= period && missing == 0 {
            result[i] = Some(sum / period as f64);
        }
    }
    result
}
