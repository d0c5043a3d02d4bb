//! Deterministic synthetic bars for offline development and tests.
//!
//! A random walk seeded with BLAKE3 over (symbol, granularity, start date):
//! the same query always yields the same series. Weekends are skipped;
//! intraday bars cover 09:30–16:00.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::source::{DataError, MarketDataSource};
use crate::domain::{Granularity, OhlcBar};

/// Upper bound on bars per fetch, so a multi-year 1m range cannot exhaust memory.
pub const MAX_SYNTHETIC_BARS: usize = 100_000;

#[derive(Debug, Clone, Default)]
pub struct SyntheticSource;

impl SyntheticSource {
    pub fn new() -> Self {
        Self
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

/// Bar timestamps for a granularity over `[start, end]`.
fn timestamps(start: NaiveDate, end: NaiveDate, granularity: Granularity) -> Vec<NaiveDateTime> {
    let mut out = Vec::new();
    let midnight = NaiveTime::MIN;
    match granularity {
        Granularity::Day => {
            let mut day = start;
            while day <= end && out.len() < MAX_SYNTHETIC_BARS {
                if !is_weekend(day) {
                    out.push(day.and_time(midnight));
                }
                day += chrono::Duration::days(1);
            }
        }
        Granularity::Week => {
            let mut day = start;
            while day <= end && out.len() < MAX_SYNTHETIC_BARS {
                out.push(day.and_time(midnight));
                day += chrono::Duration::weeks(1);
            }
        }
        Granularity::Month => {
            let mut month = NaiveDate::from_ymd_opt(start.year(), start.month(), 1);
            while let Some(first) = month {
                if first > end || out.len() >= MAX_SYNTHETIC_BARS {
                    break;
                }
                if first >= start {
                    out.push(first.and_time(midnight));
                }
                month = first.checked_add_months(chrono::Months::new(1));
            }
        }
        intraday => {
            let (Some(open), Some(close)) = (
                NaiveTime::from_hms_opt(9, 30, 0),
                NaiveTime::from_hms_opt(16, 0, 0),
            ) else {
                return out;
            };
            let step = intraday.step();
            let mut day = start;
            while day <= end && out.len() < MAX_SYNTHETIC_BARS {
                if !is_weekend(day) {
                    let mut ts = day.and_time(open);
                    let session_end = day.and_time(close);
                    while ts < session_end && out.len() < MAX_SYNTHETIC_BARS {
                        out.push(ts);
                        ts += step;
                    }
                }
                day += chrono::Duration::days(1);
            }
        }
    }
    out
}

/// Generate a deterministic random-walk series.
pub fn generate_synthetic_bars(
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    granularity: Granularity,
) -> Vec<OhlcBar> {
    let seed_input = format!("{symbol}|{granularity}|{start}");
    let seed: [u8; 32] = *blake3::hash(seed_input.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    // Scale the per-bar move down for short bars.
    let scale = if granularity.is_intraday() { 0.004 } else { 0.03 };
    let mut price = 100.0_f64;

    timestamps(start, end, granularity)
        .into_iter()
        .map(|timestamp| {
            let ret: f64 = rng.gen_range(-scale..scale);
            let open = price;
            let close = price * (1.0 + ret);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..scale / 3.0));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..scale / 3.0));
            let volume = rng.gen_range(500_000..5_000_000u64);
            price = close;
            OhlcBar {
                timestamp,
                open,
                high,
                low,
                close,
                volume,
            }
        })
        .collect()
}

impl MarketDataSource for SyntheticSource {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<OhlcBar>, DataError> {
        Ok(generate_synthetic_bars(symbol, start, end, granularity))
    }
}
