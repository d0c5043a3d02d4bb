//! Average True Range (ATR).
//!
//! True Range: max(high-low, |high-prev_close|, |low-prev_close|)
//! ATR is the simple mean of true range over `period` bars.
//! Lookback: period - 1 (TR[0] = high - low).

use super::{sma_of_series, Indicator};
use crate::domain::OhlcBar;

#[derive(Debug, Clone)]
pub struct Atr {
    period: usize,
    name: String,
}

impl Atr {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ATR period must be >= 1");
        Self {
            period,
            name: format!("atr_{period}"),
        }
    }
}

/// True Range series. TR[0] = high[0] - low[0] (no previous close).
pub fn true_range(bars: &[OhlcBar]) -> Vec<Option<f64>> {
    let valid = |v: f64| (!v.is_nan()).then_some(v);
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            let (h, l) = (valid(bar.high)?, valid(bar.low)?);
            if i == 0 {
                return Some(h - l);
            }
            let pc = valid(bars[i - 1].close)?;
            Some((h - l).max((h - pc).abs()).max((l - pc).abs()))
        })
        .collect()
}

impl Indicator for Atr {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        sma_of_series(&true_range(bars), self.period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn true_range_uses_previous_close() {
        let mut bars = make_bars(&[10.0, 10.0]);
        bars[1].high = 15.0;
        bars[1].low = 12.0;
        let tr = true_range(&bars);
        assert_approx(tr[0].unwrap(), 2.0, DEFAULT_EPSILON);
        // max(3, |15-10|, |12-10|) = 5
        assert_approx(tr[1].unwrap(), 5.0, DEFAULT_EPSILON);
    }

    #[test]
    fn atr_of_constant_range() {
        // Flat closes: every bar has high - low = 2
        let bars = make_bars(&[100.0; 6]);
        let result = Atr::new(3).compute(&bars);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        for v in &result[2..] {
            assert_approx(v.unwrap(), 2.0, DEFAULT_EPSILON);
        }
    }

    #[test]
    fn atr_nan_high_blanks_windows() {
        let mut bars = make_bars(&[100.0; 5]);
        bars[2].high = f64::NAN;
        let result = Atr::new(2).compute(&bars);
        assert!(result[2].is_none());
        assert!(result[3].is_none());
        assert!(result[4].is_some());
    }
}
