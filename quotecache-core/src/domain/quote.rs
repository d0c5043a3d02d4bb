//! Latest-price quotes and their cache keys.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{OhlcBar, QueryError};
use crate::key::{CacheKey, CacheKeyBuilder, KeyError};

/// Endpoint under which quote snapshots are cached.
pub const QUOTE_ENDPOINT: &str = "quote";

/// Last traded price of one symbol with the move against the previous close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub price: f64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub volume: u64,
    pub prev_close: Option<f64>,
    pub change: Option<f64>,
    pub change_pct: Option<f64>,
}

impl Quote {
    /// Quote from the last bar of an ascending series. `None` if the series
    /// is empty or its last close is NaN.
    pub fn from_bars(symbol: &str, bars: &[OhlcBar]) -> Option<Self> {
        let last = bars.last().filter(|b| !b.close.is_nan())?;
        let prev_close = bars
            .len()
            .checked_sub(2)
            .and_then(|i| bars.get(i))
            .map(|b| b.close)
            .filter(|c| !c.is_nan());
        let change = prev_close.map(|p| last.close - p);
        let change_pct = prev_close
            .filter(|p| *p != 0.0)
            .map(|p| (last.close - p) / p * 100.0);
        Some(Self {
            symbol: symbol.to_string(),
            timestamp: last.timestamp,
            price: last.close,
            open: last.open,
            high: last.high,
            low: last.low,
            volume: last.volume,
            prev_close,
            change,
            change_pct,
        })
    }
}

/// A request for quotes of several symbols at once.
///
/// Symbols are trimmed and upper-cased; the cache key treats them as a set,
/// so order and repeats do not matter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotesQuery {
    pub symbols: Vec<String>,
}

impl QuotesQuery {
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            symbols: symbols
                .into_iter()
                .map(|s| s.into().trim().to_uppercase())
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), QueryError> {
        if self.symbols.is_empty() {
            return Err(QueryError::NoSymbols);
        }
        if self.symbols.iter().any(|s| s.is_empty()) {
            return Err(QueryError::EmptySymbol);
        }
        Ok(())
    }

    /// Symbols sorted and without repeats, in the order quotes are returned.
    pub fn distinct_symbols(&self) -> Vec<String> {
        let mut symbols = self.symbols.clone();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn cache_key(&self) -> Result<CacheKey, KeyError> {
        CacheKeyBuilder::new(QUOTE_ENDPOINT)
            .set("symbols", self.symbols.iter().map(String::as_str))
            .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64) -> OhlcBar {
        OhlcBar {
            timestamp: NaiveDate::from_ymd_opt(2024, 1, day)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 500,
        }
    }

    #[test]
    fn symbol_order_and_case_share_a_key() {
        let a = QuotesQuery::new(["AAPL", "MSFT"]);
        let b = QuotesQuery::new(["msft", " aapl", "MSFT"]);
        assert_eq!(a.cache_key().unwrap(), b.cache_key().unwrap());
        assert_eq!(a.cache_key().unwrap().endpoint(), QUOTE_ENDPOINT);
        assert_ne!(
            a.cache_key().unwrap(),
            QuotesQuery::new(["AAPL"]).cache_key().unwrap()
        );
    }

    #[test]
    fn empty_lists_and_symbols_rejected() {
        assert_eq!(
            QuotesQuery::new(Vec::<String>::new()).validate(),
            Err(QueryError::NoSymbols)
        );
        assert_eq!(
            QuotesQuery::new(["AAPL", " "]).validate(),
            Err(QueryError::EmptySymbol)
        );
        assert_eq!(
            QuotesQuery::new(["b", "a", "B"]).distinct_symbols(),
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[test]
    fn quote_compares_against_previous_close() {
        let quote = Quote::from_bars("SPY", &[bar(2, 100.0), bar(3, 102.0)]).unwrap();
        assert_eq!(quote.price, 102.0);
        assert_eq!(quote.prev_close, Some(100.0));
        assert_eq!(quote.change, Some(2.0));
        assert!((quote.change_pct.unwrap() - 2.0).abs() < 1e-10);
        assert_eq!(quote.volume, 500);
    }

    #[test]
    fn single_bar_has_no_change() {
        let quote = Quote::from_bars("SPY", &[bar(2, 100.0)]).unwrap();
        assert_eq!(quote.prev_close, None);
        assert_eq!(quote.change_pct, None);
        assert!(Quote::from_bars("SPY", &[]).is_none());
    }
}
