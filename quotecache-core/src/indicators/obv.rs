//! On-Balance Volume (OBV).
//!
//! OBV[0] = 0; OBV[t] = OBV[t-1] + volume on an up close, - volume on a down
//! close, unchanged on a flat close. A NaN close ends the series.
//! Lookback: 0.

use super::Indicator;
use crate::domain::OhlcBar;

#[derive(Debug, Clone)]
pub struct Obv {
    name: String,
}

impl Obv {
    pub fn new() -> Self {
        Self { name: "obv".into() }
    }
}

impl Default for Obv {
    fn default() -> Self {
        Self::new()
    }
}

impl Indicator for Obv {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        0
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        let mut result = vec![None; bars.len()];
        let mut obv = 0.0;
        for (i, bar) in bars.iter().enumerate() {
            if bar.close.is_nan() {
                return result;
            }
            if i > 0 {
                let prev = bars[i - 1].close;
                let volume = bar.volume as f64;
                if bar.close > prev {
                    obv += volume;
                } else if bar.close < prev {
                    obv -= volume;
                }
            }
            result[i] = Some(obv);
        }
        result
    }
}
