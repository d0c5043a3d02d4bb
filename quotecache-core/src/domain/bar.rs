//! OHLC bars and bar granularity.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One OHLCV bar. Series of bars are ascending and unique per timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcBar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl OhlcBar {
    /// Returns true if any price field is NaN.
    pub fn is_void(&self) -> bool {
        self.open.is_nan() || self.high.is_nan() || self.low.is_nan() || self.close.is_nan()
    }

    /// Basic sanity check: high >= low, high bounds open/close, low bounds open/close.
    pub fn is_sane(&self) -> bool {
        if self.is_void() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.close > 0.0
    }

    /// (high + low + close) / 3, used by VWAP.
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }
}

/// A series that is not strictly ascending by timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeriesError {
    #[error("bar {index} at {timestamp} duplicates the previous timestamp")]
    Duplicate { index: usize, timestamp: NaiveDateTime },

    #[error("bar {index} at {timestamp} is earlier than the previous bar at {previous}")]
    OutOfOrder {
        index: usize,
        timestamp: NaiveDateTime,
        previous: NaiveDateTime,
    },
}

/// Check that `bars` is strictly ascending by timestamp. Never repairs the series.
pub fn validate_series(bars: &[OhlcBar]) -> Result<(), SeriesError> {
    for (index, pair) in bars.windows(2).enumerate() {
        let (previous, current) = (pair[0].timestamp, pair[1].timestamp);
        if current == previous {
            return Err(SeriesError::Duplicate {
                index: index + 1,
                timestamp: current,
            });
        }
        if current < previous {
            return Err(SeriesError::OutOfOrder {
                index: index + 1,
                timestamp: current,
                previous,
            });
        }
    }
    Ok(())
}

/// Bar interval. Serialized in its short form (`1m`, `1d`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    #[serde(rename = "1m")]
    Minute1,
    #[serde(rename = "5m")]
    Minute5,
    #[serde(rename = "15m")]
    Minute15,
    #[serde(rename = "30m")]
    Minute30,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1mo")]
    Month,
}

impl Granularity {
    pub const ALL: [Granularity; 8] = [
        Granularity::Minute1,
        Granularity::Minute5,
        Granularity::Minute15,
        Granularity::Minute30,
        Granularity::Hour1,
        Granularity::Day,
        Granularity::Week,
        Granularity::Month,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Minute1 => "1m",
            Granularity::Minute5 => "5m",
            Granularity::Minute15 => "15m",
            Granularity::Minute30 => "30m",
            Granularity::Hour1 => "1h",
            Granularity::Day => "1d",
            Granularity::Week => "1w",
            Granularity::Month => "1mo",
        }
    }

    /// Nominal spacing between consecutive bars. Months are approximated as 30 days.
    pub fn step(self) -> Duration {
        match self {
            Granularity::Minute1 => Duration::minutes(1),
            Granularity::Minute5 => Duration::minutes(5),
            Granularity::Minute15 => Duration::minutes(15),
            Granularity::Minute30 => Duration::minutes(30),
            Granularity::Hour1 => Duration::hours(1),
            Granularity::Day => Duration::days(1),
            Granularity::Week => Duration::weeks(1),
            Granularity::Month => Duration::days(30),
        }
    }

    pub fn is_intraday(self) -> bool {
        self < Granularity::Day
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown granularity '{0}'")]
pub struct ParseGranularityError(pub String);

impl FromStr for Granularity {
    type Err = ParseGranularityError;

    /// Accepts the short form and the upstream `K_*` names (`K_DAY`, `K_5M`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let granularity = match s.trim().to_ascii_lowercase().as_str() {
            "1m" | "k_1m" => Granularity::Minute1,
            "5m" | "k_5m" => Granularity::Minute5,
            "15m" | "k_15m" => Granularity::Minute15,
            "30m" | "k_30m" => Granularity::Minute30,
            "1h" | "60m" | "k_60m" => Granularity::Hour1,
            "1d" | "day" | "k_day" => Granularity::Day,
            "1w" | "1wk" | "week" | "k_week" => Granularity::Week,
            "1mo" | "month" | "k_mon" => Granularity::Month,
            _ => return Err(ParseGranularityError(s.to_string())),
        };
        Ok(granularity)
    }
}
