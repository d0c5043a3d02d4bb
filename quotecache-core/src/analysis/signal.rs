//! Signal classification rules.
//!
//! Each function looks at the last bar (and the one before it where a
//! crossover matters). A missing input is always `Unavailable`.

use serde::{Deserialize, Serialize};

use crate::indicators::{AdxValue, BandValue, KdjValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Bullish,
    Bearish,
    Neutral,
    Overbought,
    Oversold,
    Unavailable,
}

impl Signal {
    /// Direction of the vote this signal casts. Overbought leans bearish,
    /// oversold leans bullish; unavailable does not vote.
    pub fn vote(self) -> Option<Verdict> {
        match self {
            Signal::Bullish | Signal::Oversold => Some(Verdict::Bullish),
            Signal::Bearish | Signal::Overbought => Some(Verdict::Bearish),
            Signal::Neutral => Some(Verdict::Neutral),
            Signal::Unavailable => None,
        }
    }
}

/// Overall direction of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Bullish,
    Bearish,
    Neutral,
}

fn compare(a: f64, b: f64) -> Signal {
    if a > b {
        Signal::Bullish
    } else if a < b {
        Signal::Bearish
    } else {
        Signal::Neutral
    }
}

/// Fast line against slow line (moving averages, EMA pair), or price against a level.
pub fn above_below(value: Option<f64>, reference: Option<f64>) -> Signal {
    match (value, reference) {
        (Some(v), Some(r)) => compare(v, r),
        _ => Signal::Unavailable,
    }
}

/// MACD: a histogram sign change against the previous bar signals in the new direction.
pub fn macd(previous: Option<f64>, current: Option<f64>) -> Signal {
    let Some(current) = current else {
        return Signal::Unavailable;
    };
    match previous {
        Some(prev) if prev <= 0.0 && current > 0.0 => Signal::Bullish,
        Some(prev) if prev >= 0.0 && current < 0.0 => Signal::Bearish,
        _ => Signal::Neutral,
    }
}

/// ADX: above `trend_threshold` the dominant DI line gives the direction,
/// otherwise the market is ranging.
pub fn adx(current: Option<AdxValue>, trend_threshold: f64) -> Signal {
    match current {
        None => Signal::Unavailable,
        Some(v) if v.adx > trend_threshold && v.plus_di > v.minus_di => Signal::Bullish,
        Some(v) if v.adx > trend_threshold => Signal::Bearish,
        Some(_) => Signal::Neutral,
    }
}

/// Oscillator against overbought/oversold thresholds (RSI).
pub fn threshold(value: Option<f64>, overbought: f64, oversold: f64) -> Signal {
    match value {
        None => Signal::Unavailable,
        Some(v) if v > overbought => Signal::Overbought,
        Some(v) if v < oversold => Signal::Oversold,
        Some(_) => Signal::Neutral,
    }
}

/// Close against the outer bands.
pub fn bollinger(close: Option<f64>, band: Option<BandValue>) -> Signal {
    match (close, band) {
        (Some(c), Some(b)) if c > b.upper => Signal::Overbought,
        (Some(c), Some(b)) if c < b.lower => Signal::Oversold,
        (Some(_), Some(_)) => Signal::Neutral,
        _ => Signal::Unavailable,
    }
}

/// KDJ: zones first, then a K/D crossover on the last bar.
pub fn kdj(
    previous: Option<KdjValue>,
    current: Option<KdjValue>,
    overbought: f64,
    oversold: f64,
) -> Signal {
    let Some(cur) = current else {
        return Signal::Unavailable;
    };
    if cur.k > overbought && cur.d > overbought {
        return Signal::Overbought;
    }
    if cur.k < oversold && cur.d < oversold {
        return Signal::Oversold;
    }
    match previous {
        Some(prev) if prev.k <= prev.d && cur.k > cur.d => Signal::Bullish,
        Some(prev) if prev.k >= prev.d && cur.k < cur.d => Signal::Bearish,
        _ => Signal::Neutral,
    }
}

/// Non-directional indicators (ATR) only report availability.
pub fn non_directional<T>(current: Option<T>) -> Signal {
    if current.is_some() {
        Signal::Neutral
    } else {
        Signal::Unavailable
    }
}
