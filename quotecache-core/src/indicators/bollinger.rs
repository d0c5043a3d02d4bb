//! Bollinger Bands: moving average +/- standard deviation multiplier.
//!
//! - Middle: SMA(close, period)
//! - Upper: middle + k * stddev(close, period)
//! - Lower: middle - k * stddev(close, period)
//!
//! Uses population stddev (divide by N).
//! Lookback: period - 1.

use serde::{Deserialize, Serialize};

use super::{closes, Indicator};
use crate::domain::OhlcBar;

/// The three bands at one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BandValue {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BandValue {
    /// Band width relative to the middle band.
    pub fn bandwidth(&self) -> f64 {
        if self.middle == 0.0 {
            0.0
        } else {
            (self.upper - self.lower) / self.middle
        }
    }
}

#[derive(Debug, Clone)]
pub struct Bollinger {
    period: usize,
    multiplier: f64,
    name: String,
}

impl Bollinger {
    pub fn new(period: usize, multiplier: f64) -> Self {
        assert!(period >= 1, "Bollinger period must be >= 1");
        Self {
            period,
            multiplier,
            name: format!("bollinger_{period}_{multiplier}"),
        }
    }
}

impl Indicator for Bollinger {
    type Output = BandValue;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<BandValue>> {
        let n = bars.len();
        let mut result = vec![None; n];
        if n < self.period {
            return result;
        }

        let prices = closes(bars);
        for i in (self.period - 1)..n {
            let window = &prices[i + 1 - self.period..=i];
            let Some(values) = window.iter().copied().collect::<Option<Vec<f64>>>() else {
                continue;
            };
            let mean = values.iter().sum::<f64>() / self.period as f64;
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / self.period as f64;
            let offset = self.multiplier * variance.max(0.0).sqrt();
            result[i] = Some(BandValue {
                upper: mean + offset,
                middle: mean,
                lower: mean - offset,
            });
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn bollinger_known_values() {
        // Window [2,4,4,4,5,5,7,9]: mean 5, population stddev 2
        let bars = make_bars(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let result = Bollinger::new(8, 2.0).compute(&bars);
        assert!(result[..7].iter().all(Option::is_none));
        let band = result[7].unwrap();
        assert_approx(band.middle, 5.0, DEFAULT_EPSILON);
        assert_approx(band.upper, 9.0, DEFAULT_EPSILON);
        assert_approx(band.lower, 1.0, DEFAULT_EPSILON);
    }

    #[test]
    fn bollinger_flat_series_collapses() {
        let bars = make_bars(&[50.0; 5]);
        let band = Bollinger::new(3, 2.0).compute(&bars)[4].unwrap();
        assert_approx(band.upper, 50.0, DEFAULT_EPSILON);
        assert_approx(band.lower, 50.0, DEFAULT_EPSILON);
        assert_approx(band.bandwidth(), 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn bollinger_nan_window_is_none() {
        let mut bars = make_bars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        bars[1].close = f64::NAN;
        let result = Bollinger::new(2, 2.0).compute(&bars);
        assert!(result[1].is_none());
        assert!(result[2].is_none());
        assert!(result[3].is_some());
    }

    #[test]
    fn bollinger_lookback() {
        assert_eq!(Bollinger::new(20, 2.0).lookback(), 19);
    }
}
