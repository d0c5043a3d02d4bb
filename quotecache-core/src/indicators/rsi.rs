//! Relative Strength Index (RSI).
//!
//! Uses Wilder smoothing of average gains and average losses.
//! RSI = 100 - 100 / (1 + avg_gain / avg_loss)
//! Lookback: period (needs period + 1 closes).
//! Edge cases: avg_loss == 0 → RSI = 100; avg_gain == 0 → RSI = 0; both → 50.

use super::{closes, Indicator};
use crate::domain::OhlcBar;

#[derive(Debug, Clone)]
pub struct Rsi {
    period: usize,
    name: String,
}

impl Rsi {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "RSI period must be >= 1");
        Self {
            period,
            name: format!("rsi_{period}"),
        }
    }
}

impl Indicator for Rsi {
    type Output = f64;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        let n = bars.len();
        let mut result = vec![None; n];
        if n < self.period + 1 {
            return result;
        }

        let prices = closes(bars);
        let changes: Vec<Option<f64>> = std::iter::once(None)
            .chain(prices.windows(2).map(|w| Some(w[1]? - w[0]?)))
            .collect();

        // Seed: simple mean of the first `period` changes
        let mut avg_gain = 0.0;
        let mut avg_loss = 0.0;
        for change in &changes[1..=self.period] {
            let Some(ch) = *change else {
                return result;
            };
            if ch > 0.0 {
                avg_gain += ch;
            } else {
                avg_loss -= ch;
            }
        }
        avg_gain /= self.period as f64;
        avg_loss /= self.period as f64;
        result[self.period] = Some(compute_rsi(avg_gain, avg_loss));

        let alpha = 1.0 / self.period as f64;
        for i in (self.period + 1)..n {
            let Some(ch) = changes[i] else {
                return result;
            };
            let gain = ch.max(0.0);
            let loss = (-ch).max(0.0);
            avg_gain = alpha * gain + (1.0 - alpha) * avg_gain;
            avg_loss = alpha * loss + (1.0 - alpha) * avg_loss;
            result[i] = Some(compute_rsi(avg_gain, avg_loss));
        }

        result
    }
}

fn compute_rsi(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 && avg_gain == 0.0 {
        50.0 // no movement
    } else if avg_loss == 0.0 {
        100.0
    } else if avg_gain == 0.0 {
        0.0
    } else {
        100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{assert_approx, make_bars, DEFAULT_EPSILON};

    #[test]
    fn rsi_all_gains() {
        let bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        let result = Rsi::new(3).compute(&bars);
        assert!(result[..3].iter().all(Option::is_none));
        assert_approx(result[3].unwrap(), 100.0, DEFAULT_EPSILON);
        assert_approx(result[5].unwrap(), 100.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_all_losses() {
        let bars = make_bars(&[105.0, 104.0, 103.0, 102.0, 101.0]);
        let result = Rsi::new(3).compute(&bars);
        assert_approx(result[3].unwrap(), 0.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_flat_is_fifty() {
        let bars = make_bars(&[100.0; 6]);
        let result = Rsi::new(3).compute(&bars);
        assert_approx(result[5].unwrap(), 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_14_hand_computed() {
        // 14 changes alternating +2 / -1: avg_gain = 1.0, avg_loss = 0.5
        // RS = 2 → RSI = 100 - 100/3
        let mut closes = vec![100.0];
        for i in 0..14 {
            let last = *closes.last().unwrap();
            closes.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let bars = make_bars(&closes);
        let result = Rsi::new(14).compute(&bars);
        assert_eq!(result.len(), 15);
        assert!(result[13].is_none());
        assert_approx(result[14].unwrap(), 100.0 - 100.0 / 3.0, 1e-6);
    }

    #[test]
    fn rsi_wilder_step() {
        // Seed over [+1, -1] with period 2: avg_gain = 0.5, avg_loss = 0.5 → 50
        // Next change +2: avg_gain = 0.5*2 + 0.5*0.5 = 1.25, avg_loss = 0.25 → RS 5
        let bars = make_bars(&[10.0, 11.0, 10.0, 12.0]);
        let result = Rsi::new(2).compute(&bars);
        assert_approx(result[2].unwrap(), 50.0, DEFAULT_EPSILON);
        assert_approx(result[3].unwrap(), 100.0 - 100.0 / 6.0, DEFAULT_EPSILON);
    }

    #[test]
    fn rsi_insufficient_data() {
        let bars = make_bars(&[100.0, 101.0, 102.0]);
        assert!(Rsi::new(14).compute(&bars).iter().all(Option::is_none));
    }

    #[test]
    fn rsi_bounded() {
        let bars = make_bars(&[
            44.0, 44.3, 44.1, 43.6, 44.3, 44.8, 45.1, 45.4, 45.8, 46.1, 45.9, 46.0, 45.2, 44.5,
            44.8, 45.6, 46.3, 46.2,
        ]);
        for v in Rsi::new(14).compute(&bars).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&v));
        }
    }

    #[test]
    fn rsi_nan_stops_series() {
        let mut bars = make_bars(&[100.0, 101.0, 102.0, 103.0, 104.0, 105.0]);
        bars[4].close = f64::NAN;
        let result = Rsi::new(2).compute(&bars);
        assert!(result[2].is_some());
        assert!(result[3].is_some());
        assert!(result[4].is_none());
        assert!(result[5].is_none());
    }
}
