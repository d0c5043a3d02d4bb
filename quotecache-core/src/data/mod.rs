//! Market-data sources.
//!
//! The `MarketDataSource` trait abstracts over upstreams so the cache and the
//! preloader never depend on a particular one. `TimedSource` bounds every
//! fetch with a timeout.

pub mod circuit_breaker;
pub mod csv_source;
pub mod source;
pub mod synthetic;
pub mod yahoo;

pub use circuit_breaker::CircuitBreaker;
pub use csv_source::CsvSource;
pub use source::{DataError, MarketDataSource, TimedSource};
pub use synthetic::{generate_synthetic_bars, SyntheticSource};
pub use yahoo::YahooSource;
