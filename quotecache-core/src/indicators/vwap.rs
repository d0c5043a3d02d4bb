//! Volume-Weighted Average Price (VWAP), cumulative over the series.
//!
//! VWAP[t] = sum(typical_price * volume) / sum(volume) over bars 0..=t,
//! typical price = (high + low + close) / 3. `None` while cumulative volume
//! is zero. A NaN price ends the series.
//! Lookback: 0.

use super::Indicator;
use crate::domain::OhlcBar;

#[derive(Debug, Clone)]
pub struct Vwap {
    name: String,
}

impl Vwap {
    pub fn new() -> Self {
        Self {
            name: "vwap".into(),
        }
    }
}

impl Default for Vwap {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for Vwap {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        0
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        let mut result = vec![None; bars.len()];
        let mut weighted = 0.0;
        let mut volume = 0.0;
        for (i, bar) in bars.iter().enumerate() {
            let typical = bar.typical_price();
            if typical.is_nan() {
                return result;
            }
            weighted += typical * bar.volume as f64;
            volume += bar.volume as f64;
            if volume > 0.0 {
                result[i] = Some(weighted / volume);
            }
        }
        result
    }
}
