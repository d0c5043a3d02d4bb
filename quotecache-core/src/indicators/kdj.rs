//! KDJ stochastic oscillator.
//!
//! RSV = (close - lowest low) / (highest high - lowest low) * 100 over `period` bars.
//! K = K[t-1] + (RSV - K[t-1]) / k_smoothing, D = D[t-1] + (K - D[t-1]) / d_smoothing,
//! each seeded from its first input. J = 3K - 2D.
//! A zero high-low range holds the previous K; a zero range in the very first
//! window seeds K at 50.
//! Lookback: period - 1.

use serde::{Deserialize, Serialize};

use super::Indicator;
use crate::domain::OhlcBar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KdjValue {
    pub k: f64,
    pub d: f64,
    pub j: f64,
}

#[derive(Debug, Clone)]
pub struct Kdj {
    period: usize,
    k_smoothing: usize,
    d_smoothing: usize,
    name: String,
}

impl Kdj {
    pub fn new(period: usize, k_smoothing: usize, d_smoothing: usize) -> Self {
        assert!(
            period >= 1 && k_smoothing >= 1 && d_smoothing >= 1,
            "KDJ periods must be >= 1"
        );
        Self {
            period,
            k_smoothing,
            d_smoothing,
            name: format!("kdj_{period}_{k_smoothing}_{d_smoothing}"),
        }
    }

    fn window_has_nan(window: &[OhlcBar]) -> bool {
        window
            .iter()
            .any(|b| b.high.is_nan() || b.low.is_nan() || b.close.is_nan())
    }
}

impl Indicator for Kdj {
    type Output = KdjValue;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period.saturating_sub(1)
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<KdjValue>> {
        let n = bars.len();
        let mut result = vec![None; n];
        if n < self.period {
            return result;
        }

        let k_alpha = 1.0 / self.k_smoothing as f64;
        let d_alpha = 1.0 / self.d_smoothing as f64;
        let mut prev: Option<(f64, f64)> = None;

        for i in (self.period - 1)..n {
            let window = &bars[i + 1 - self.period..=i];
            if Self::window_has_nan(window) {
                return result;
            }
            let highest = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let lowest = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
            let range = highest - lowest;

            let (k, d) = match prev {
                None => {
                    let k = if range > 0.0 {
                        (bars[i].close - lowest) / range * 100.0
                    } else {
                        50.0
                    };
                    (k, k)
                }
                Some((prev_k, prev_d)) => {
                    let k = if range > 0.0 {
                        let rsv = (bars[i].close - lowest) / range * 100.0;
                        prev_k + (rsv - prev_k) * k_alpha
                    } else {
                        prev_k
                    };
                    (k, prev_d + (k - prev_d) * d_alpha)
                }
            };
            prev = Some((k, d));
            result[i] = Some(KdjValue {
                k,
                d,
                j: 3.0 * k - 2.0 * d,
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
    fn kdj_seed_from_first_rsv() {
        // make_bars: high = max(open, close) + 1, low = min(open, close) - 1
        // Window closes [10, 12, 14]: high 15, low 9 → RSV = (14-9)/6*100
        let bars = make_bars(&[10.0, 12.0, 14.0]);
        let result = Kdj::new(3, 3, 3).compute(&bars);
        assert!(result[0].is_none());
        assert!(result[1].is_none());
        let v = result[2].unwrap();
        let rsv = 5.0 / 6.0 * 100.0;
        assert_approx(v.k, rsv, DEFAULT_EPSILON);
        assert_approx(v.d, rsv, DEFAULT_EPSILON);
        assert_approx(v.j, rsv, DEFAULT_EPSILON);
    }

    #[test]
    fn kdj_smoothing_step() {
        let bars = make_bars(&[10.0, 12.0, 14.0, 13.0]);
        let result = Kdj::new(3, 3, 3).compute(&bars);
        let k0 = 5.0 / 6.0 * 100.0;
        // Window bars 1..=3: high 15, low 9 (bar 1 opens at 10) → RSV = 4/6*100
        let rsv = 4.0 / 6.0 * 100.0;
        let k1 = k0 + (rsv - k0) / 3.0;
        let d1 = k0 + (k1 - k0) / 3.0;
        let v = result[3].unwrap();
        assert_approx(v.k, k1, DEFAULT_EPSILON);
        assert_approx(v.d, d1, DEFAULT_EPSILON);
        assert_approx(v.j, 3.0 * k1 - 2.0 * d1, DEFAULT_EPSILON);
    }

    #[test]
    fn kdj_zero_range_holds_k() {
        let mut bars = make_bars(&[10.0, 12.0, 14.0, 14.0, 14.0, 14.0]);
        for bar in &mut bars[3..] {
            bar.high = 14.0;
            bar.low = 14.0;
            bar.open = 14.0;
        }
        bars[2].high = 14.0;
        bars[2].low = 14.0;
        bars[2].open = 14.0;
        let result = Kdj::new(3, 3, 3).compute(&bars);
        // Window [2..=4] is flat: K holds its previous value.
        let k3 = result[3].unwrap().k;
        assert_approx(result[4].unwrap().k, k3, DEFAULT_EPSILON);
        assert_approx(result[5].unwrap().k, k3, DEFAULT_EPSILON);
    }

    #[test]
    fn kdj_flat_first_window_seeds_fifty() {
        let mut bars = make_bars(&[5.0; 3]);
        for bar in &mut bars {
            bar.high = 5.0;
            bar.low = 5.0;
        }
        let v = Kdj::new(3, 3, 3).compute(&bars)[2].unwrap();
        assert_approx(v.k, 50.0, DEFAULT_EPSILON);
    }

    #[test]
    fn kdj_insufficient_data() {
        let bars = make_bars(&[1.0, 2.0]);
        assert!(Kdj::new(9, 3, 3).compute(&bars).iter().all(Option::is_none));
    }
}
