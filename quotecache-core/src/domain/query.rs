//! Bar-series queries and their cache keys.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Granularity;
use crate::key::{CacheKey, CacheKeyBuilder, KeyError};

/// Endpoint under which bar series are cached. The request path and the
/// preloader both derive keys from it, so a preloaded series is a request hit.
pub const BARS_ENDPOINT: &str = "kline";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("symbol must not be empty")]
    EmptySymbol,

    #[error("at least one symbol is required")]
    NoSymbols,

    #[error("start date {start} is after end date {end}")]
    InvertedRange { start: NaiveDate, end: NaiveDate },
}

/// A request for one symbol's bars over an inclusive date range.
///
/// Symbols are trimmed and upper-cased on construction so `spy` and `SPY`
/// share a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BarsQuery {
    pub symbol: String,
    pub granularity: Granularity,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BarsQuery {
    pub fn new(
        symbol: impl Into<String>,
        granularity: Granularity,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Self {
        Self {
            symbol: symbol.into().trim().to_uppercase(),
            granularity,
            start,
            end,
        }
    }

    /// The `days`-long window ending at `as_of`.
    pub fn lookback(
        symbol: impl Into<String>,
        granularity: Granularity,
        as_of: NaiveDate,
        days: u32,
    ) -> Self {
        let start = as_of - chrono::Duration::days(i64::from(days));
        Self::new(symbol, granularity, start, as_of)
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.symbol.trim().is_empty() {
            return Err(QueryError::EmptySymbol);
        }
        if self.start > self.end {
            return Err(QueryError::InvertedRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    pub fn cache_key(&self) -> Result<CacheKey, KeyError> {
        CacheKeyBuilder::new(BARS_ENDPOINT)
            .param("symbol", self.symbol.as_str())
            .param("granularity", self.granularity.as_str())
            .param("start", self.start)
            .param("end", self.end)
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn lookback_spans_days_before_as_of() {
        let q = BarsQuery::lookback("AAPL", Granularity::Day, date(2024, 3, 31), 30);
        assert_eq!(q.start, date(2024, 3, 1));
        assert_eq!(q.end, date(2024, 3, 31));
    }

    #[test]
    fn empty_symbol_rejected() {
        let q = BarsQuery::new(" ", Granularity::Day, date(2024, 1, 1), date(2024, 1, 2));
        assert_eq!(q.validate(), Err(QueryError::EmptySymbol));
    }

    #[test]
    fn inverted_range_rejected() {
        let q = BarsQuery::new("AAPL", Granularity::Day, date(2024, 2, 1), date(2024, 1, 1));
        assert!(matches!(q.validate(), Err(QueryError::InvertedRange { .. })));
    }

    #[test]
    fn equal_queries_share_a_key() {
        let a = BarsQuery::new("AAPL", Granularity::Day, date(2024, 1, 1), date(2024, 2, 1));
        let b = a.clone();
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
        assert_eq!(a.cache_key().unwrap().endpoint(), BARS_ENDPOINT);
    }

    #[test]
    fn symbol_case_is_normalized() {
        let a = BarsQuery::new(" spy", Granularity::Day, date(2024, 1, 1), date(2024, 2, 1));
        let b = BarsQuery::new("SPY", Granularity::Day, date(2024, 1, 1), date(2024, 2, 1));
        assert_eq!(a.symbol, "SPY");
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }

    #[test]
    fn granularity_changes_the_key() {
        let a = BarsQuery::new("AAPL", Granularity::Day, date(2024, 1, 1), date(2024, 2, 1));
        let mut b = a.clone();
        b.granularity = Granularity::Week;
        assert_ne!(a.cache_key().unwrap(), b.cache_key().unwrap());
    }
}
