//! Domain types shared by the cache, the sources and the indicator engine.

pub mod bar;
pub mod query;
pub mod quote;

pub use bar::{validate_series, Granularity, OhlcBar, ParseGranularityError, SeriesError};
pub use query::{BarsQuery, QueryError, BARS_ENDPOINT};
pub use quote::{Quote, QuotesQuery, QUOTE_ENDPOINT};
