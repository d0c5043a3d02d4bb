//! Moving Average Convergence Divergence (MACD).
//!
//! MACD line = EMA(fast) - EMA(slow); signal line = EMA(MACD line, signal);
//! histogram = MACD - signal.
//! Lookback: slow + signal - 2 (a value needs the signal line).

use serde::{Deserialize, Serialize};

use super::{closes, ema_of_series, Indicator};
use crate::domain::OhlcBar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone)]
pub struct Macd {
    fast: usize,
    slow: usize,
    signal: usize,
    name: String,
}

impl Macd {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        assert!(fast >= 1 && signal >= 1, "MACD periods must be >= 1");
        assert!(fast < slow, "MACD fast period must be shorter than slow");
        Self {
            fast,
            slow,
            signal,
            name: format!("macd_{fast}_{slow}_{signal}"),
        }
    }

    /// The MACD line alone; available from index slow - 1.
    pub fn macd_line(&self, bars: &[OhlcBar]) -> Vec<Option<f64>> {
        let prices = closes(bars);
        let fast = ema_of_series(&prices, self.fast);
        let slow = ema_of_series(&prices, self.slow);
        fast.iter()
            .zip(&slow)
            .map(|(f, s)| Some((*f)? - (*s)?))
            .collect()
    }
}

impl Indicator for Macd {
    type Output = MacdValue;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.slow + self.signal - 2
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<MacdValue>> {
        let line = self.macd_line(bars);
        let signal = ema_of_series(&line, self.signal);
        line.iter()
            .zip(&signal)
            .map(|(m, s)| {
                let (macd, signal) = ((*m)?, (*s)?);
                Some(MacdValue {
                    macd,
                    signal,
                    histogram: macd - signal,
                })
            })
            .collect()
    }
}
