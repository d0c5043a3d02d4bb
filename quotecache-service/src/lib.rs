//! QuoteCache Service: the layer between a transport and the core.
//!
//! This crate builds on `quotecache-core` to provide:
//! - TOML configuration with defaults for every field
//! - The request path (bars, quotes, analysis) and cache administration
//! - The response envelope and its return codes
//! - Field projection over serialized payloads
//! - Logging setup

pub mod config;
pub mod envelope;
pub mod logging;
pub mod projection;
pub mod service;

pub use config::{ConfigError, QuoteCacheConfig, SourceKind};
pub use envelope::{DataSourceTag, ResponseEnvelope, RET_CALLER_ERROR, RET_OK, RET_RETRYABLE};
pub use logging::init_logging;
pub use projection::{DataOptimization, ANALYSIS_FIELDS, BAR_FIELDS, QUOTE_FIELDS};
pub use service::{
    build_source, AnalysisQuery, CacheStatus, ClearReport, QuoteService, Served, ServiceError,
    ServiceOptions,
};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn service_is_send_sync() {
        assert_send::<QuoteService>();
        assert_sync::<QuoteService>();
    }

    #[test]
    fn config_is_send_sync() {
        assert_send::<QuoteCacheConfig>();
        assert_sync::<QuoteCacheConfig>();
    }
}
