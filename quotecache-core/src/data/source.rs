//! Market-data source trait and structured error types.
//!
//! `MarketDataSource` abstracts over upstreams (Yahoo chart API, CSV
//! directory, synthetic random walk) so the cache and preloader can be run and
//! tested against any of them. Sources know nothing about the cache.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use thiserror::Error;

use crate::deadline::{call_with_timeout, private_pool, DeadlineError};
use crate::domain::{BarsQuery, Granularity, OhlcBar, Quote};

/// Structured error types for upstream fetches.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("source did not answer within {0:?}")]
    Timeout(Duration),

    #[error("rate limited by source (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: source has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("{source_name} does not serve {granularity} bars")]
    UnsupportedGranularity {
        source_name: String,
        granularity: Granularity,
    },

    #[error("source returned no bars for '{symbol}'")]
    EmptyResult { symbol: String },

    #[error("CSV error: {0}")]
    Csv(String),

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether the same request may succeed later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_)
                | DataError::Timeout(_)
                | DataError::RateLimited { .. }
                | DataError::CircuitBreakerTripped
        )
    }
}

/// Calendar days of daily bars a default quote looks back over.
const QUOTE_WINDOW_DAYS: i64 = 14;

/// An upstream provider of OHLC bars.
pub trait MarketDataSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// Bars for `symbol` between `start` and `end` inclusive, ascending by timestamp.
    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<OhlcBar>, DataError>;

    /// Latest quote for `symbol` as of `as_of`, taken from the last two daily
    /// bars of the preceding fortnight.
    fn fetch_quote(&self, symbol: &str, as_of: NaiveDate) -> Result<Quote, DataError> {
        let start = as_of - chrono::Duration::days(QUOTE_WINDOW_DAYS);
        let bars = self.fetch_bars(symbol, start, as_of, Granularity::Day)?;
        Quote::from_bars(symbol, &bars).ok_or_else(|| DataError::EmptyResult {
            symbol: symbol.to_string(),
        })
    }

    /// Whether the source currently accepts requests (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }
}

/// Wraps a source so every fetch is bounded by a timeout.
///
/// A timed-out fetch returns `DataError::Timeout`; the call keeps running on
/// the private pool and its result is discarded.
pub struct TimedSource {
    source: Arc<dyn MarketDataSource>,
    pool: rayon::ThreadPool,
    timeout: Duration,
}

impl TimedSource {
    pub fn new(
        source: Arc<dyn MarketDataSource>,
        timeout: Duration,
        threads: usize,
    ) -> Result<Self, DataError> {
        let pool = private_pool(threads, "quotecache-fetch")
            .map_err(|e| DataError::Other(format!("could not start fetch pool: {e}")))?;
        Ok(Self {
            source,
            pool,
            timeout,
        })
    }

    pub fn name(&self) -> &str {
        self.source.name()
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    pub fn fetch(&self, query: &BarsQuery) -> Result<Vec<OhlcBar>, DataError> {
        let source = Arc::clone(&self.source);
        let q = query.clone();
        let result = call_with_timeout(&self.pool, self.timeout, move || {
            source.fetch_bars(&q.symbol, q.start, q.end, q.granularity)
        });
        match result {
            Ok(bars) => bars,
            Err(DeadlineError::TimedOut(after)) => Err(DataError::Timeout(after)),
            Err(DeadlineError::Abandoned) => Err(DataError::Other(format!(
                "{} fetch for '{}' panicked",
                self.source.name(),
                query.symbol
            ))),
        }
    }

    /// Quotes for `symbols` in order. One deadline covers the whole batch and
    /// the first failing symbol fails it.
    pub fn fetch_quotes(
        &self,
        symbols: &[String],
        as_of: NaiveDate,
    ) -> Result<Vec<Quote>, DataError> {
        let source = Arc::clone(&self.source);
        let batch = symbols.to_vec();
        let result = call_with_timeout(&self.pool, self.timeout, move || {
            batch
                .iter()
                .map(|symbol| source.fetch_quote(symbol, as_of))
                .collect::<Result<Vec<_>, _>>()
        });
        match result {
            Ok(quotes) => quotes,
            Err(DeadlineError::TimedOut(after)) => Err(DataError::Timeout(after)),
            Err(DeadlineError::Abandoned) => Err(DataError::Other(format!(
                "{} quote fetch for {} symbols panicked",
                self.source.name(),
                symbols.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Sleepy(Duration);

    impl MarketDataSource for Sleepy {
        fn name(&self) -> &str {
            "sleepy"
        }

        fn fetch_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
            _granularity: Granularity,
        ) -> Result<Vec<OhlcBar>, DataError> {
            std::thread::sleep(self.0);
            Ok(Vec::new())
        }
    }

    fn query() -> BarsQuery {
        let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        BarsQuery::new("AAPL", Granularity::Day, day, day)
    }

    #[test]
    fn retryable_classification() {
        assert!(DataError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(DataError::RateLimited { retry_after_secs: 60 }.is_retryable());
        assert!(DataError::CircuitBreakerTripped.is_retryable());
        assert!(!DataError::SymbolNotFound { symbol: "X".into() }.is_retryable());
        assert!(!DataError::ResponseFormatChanged("x".into()).is_retryable());
    }

    #[test]
    fn timed_source_passes_fast_results_through() {
        let source = TimedSource::new(
            Arc::new(Sleepy(Duration::ZERO)),
            Duration::from_secs(1),
            1,
        )
        .unwrap();
        assert_eq!(source.fetch(&query()).unwrap(), Vec::new());
        assert_eq!(source.name(), "sleepy");
    }

    struct TwoBars;

    impl MarketDataSource for TwoBars {
        fn name(&self) -> &str {
            "two-bars"
        }

        fn fetch_bars(
            &self,
            symbol: &str,
            _start: NaiveDate,
            end: NaiveDate,
            _granularity: Granularity,
        ) -> Result<Vec<OhlcBar>, DataError> {
            if symbol == "NONE" {
                return Ok(Vec::new());
            }
            let bar = |days_back: i64, close: f64| OhlcBar {
                timestamp: (end - chrono::Duration::days(days_back))
                    .and_hms_opt(0, 0, 0)
                    .unwrap(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 10,
            };
            Ok(vec![bar(1, 50.0), bar(0, 55.0)])
        }
    }

    #[test]
    fn quotes_come_from_the_last_two_bars() {
        let source = TimedSource::new(Arc::new(TwoBars), Duration::from_secs(1), 1).unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let quotes = source
            .fetch_quotes(&["AAPL".to_string(), "MSFT".to_string()], as_of)
            .unwrap();
        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[1].symbol, "MSFT");
        assert_eq!(quotes[0].price, 55.0);
        assert_eq!(quotes[0].change, Some(5.0));
        assert_eq!(quotes[0].timestamp.date(), as_of);
    }

    #[test]
    fn quote_without_bars_is_empty_result() {
        let source = TimedSource::new(Arc::new(TwoBars), Duration::from_secs(1), 1).unwrap();
        let as_of = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let err = source
            .fetch_quotes(&["AAPL".to_string(), "NONE".to_string()], as_of)
            .unwrap_err();
        assert_eq!(err, DataError::EmptyResult { symbol: "NONE".into() });
    }

    #[test]
    fn timed_source_times_out() {
        let source = TimedSource::new(
            Arc::new(Sleepy(Duration::from_millis(300))),
            Duration::from_millis(20),
            1,
        )
        .unwrap();
        let err = source.fetch(&query()).unwrap_err();
        assert_eq!(err, DataError::Timeout(Duration::from_millis(20)));
        assert!(err.is_retryable());
    }
}
