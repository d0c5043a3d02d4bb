//! The request path: cache lookup, bounded source fetch, write-back and
//! analysis, plus the cache administration operations.
//!
//! Quotes are short-lived and are written to L1 and L2 only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use quotecache_core::analysis::{
    AnalysisCache, AnalysisError, AnalysisRequest, AnalysisSummary, EngineError,
};
use quotecache_core::cache::{
    CacheError, CacheStats, DurableStore, KeyPattern, MemoryKvStore, SqliteStore, Tier,
    TierSelection, TieredCache,
};
use quotecache_core::data::{
    CircuitBreaker, CsvSource, DataError, MarketDataSource, SyntheticSource, TimedSource,
    YahooSource,
};
use quotecache_core::domain::{BarsQuery, OhlcBar, QueryError, Quote, QuotesQuery};
use quotecache_core::key::KeyError;
use quotecache_core::preload::{
    PreloadConfig, PreloadError, PreloadProgress, PreloadReport, PreloadRequest, Preloader,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, QuoteCacheConfig, SourceKind, SourceSection};
use crate::envelope::{DataSourceTag, RET_CALLER_ERROR, RET_RETRYABLE};
use crate::projection::DataOptimization;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Source(#[from] DataError),

    #[error("analysis failed: {0}")]
    Engine(#[from] EngineError),

    #[error("could not encode payload: {0}")]
    Codec(String),

    #[error("could not start service: {0}")]
    Startup(String),
}

impl ServiceError {
    /// Envelope code: -2 when the same request may succeed later, else -1.
    pub fn ret_code(&self) -> i32 {
        match self {
            ServiceError::Source(e) if e.is_retryable() => RET_RETRYABLE,
            _ => RET_CALLER_ERROR,
        }
    }
}

impl From<QueryError> for ServiceError {
    fn from(e: QueryError) -> Self {
        ServiceError::InvalidRequest(e.to_string())
    }
}

impl From<KeyError> for ServiceError {
    fn from(e: KeyError) -> Self {
        ServiceError::InvalidRequest(e.to_string())
    }
}

impl From<CacheError> for ServiceError {
    fn from(e: CacheError) -> Self {
        match e {
            CacheError::ZeroTtl(_) => ServiceError::InvalidRequest(e.to_string()),
            CacheError::Codec { .. } => ServiceError::Codec(e.to_string()),
            CacheError::Spawn(_) => ServiceError::Startup(e.to_string()),
        }
    }
}

impl From<AnalysisError> for ServiceError {
    fn from(e: AnalysisError) -> Self {
        match e {
            AnalysisError::Engine(e) => ServiceError::Engine(e),
            AnalysisError::Key(e) => e.into(),
            AnalysisError::Cache(e) => e.into(),
        }
    }
}

impl From<ConfigError> for ServiceError {
    fn from(e: ConfigError) -> Self {
        ServiceError::Startup(e.to_string())
    }
}

impl From<PreloadError> for ServiceError {
    fn from(e: PreloadError) -> Self {
        ServiceError::Startup(e.to_string())
    }
}

/// A payload and how it was obtained.
#[derive(Debug, Clone, PartialEq)]
pub struct Served<T> {
    pub data: T,
    pub cache_hit: bool,
    pub source: DataSourceTag,
    /// Tier that answered, on a hit.
    pub tier: Option<Tier>,
    pub elapsed: Duration,
}

impl<T> Served<T> {
    fn hit(data: T, tier: Tier, elapsed: Duration) -> Self {
        Self {
            data,
            cache_hit: true,
            source: DataSourceTag::Cache,
            tier: Some(tier),
            elapsed,
        }
    }

    fn fetched(data: T, elapsed: Duration) -> Self {
        Self {
            data,
            cache_hit: false,
            source: DataSourceTag::Source,
            tier: None,
            elapsed,
        }
    }
}

impl<T: Serialize> Served<T> {
    /// Serialize the payload and apply the projection.
    pub fn project(
        self,
        options: &DataOptimization,
        essential: &[&str],
    ) -> Result<Served<Value>, ServiceError> {
        let value =
            serde_json::to_value(&self.data).map_err(|e| ServiceError::Codec(e.to_string()))?;
        Ok(Served {
            data: options.apply(value, essential),
            cache_hit: self.cache_hit,
            source: self.source,
            tier: self.tier,
            elapsed: self.elapsed,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisQuery {
    pub bars: BarsQuery,
    pub request: AnalysisRequest,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub source: String,
    pub source_available: bool,
    /// Rows in the durable store, if one is attached and it answered.
    pub durable_entries: Option<usize>,
    pub stats: CacheStats,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClearReport {
    /// Symbol the clear was restricted to, if any.
    pub symbol: Option<String>,
    pub memory_removed: usize,
    /// Slower tiers whose removal was queued.
    pub queued: Vec<Tier>,
}

/// Knobs of the request path.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub bars_ttl: Duration,
    pub analysis_ttl: Duration,
    pub quote_ttl: Duration,
    pub fetch_timeout: Duration,
    pub fetch_threads: usize,
    pub preload: PreloadConfig,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            bars_ttl: Duration::from_secs(3600),
            analysis_ttl: Duration::from_secs(900),
            quote_ttl: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            fetch_threads: 4,
            preload: PreloadConfig::default(),
        }
    }
}

impl ServiceOptions {
    pub fn from_config(config: &QuoteCacheConfig) -> Self {
        Self {
            bars_ttl: config.bars_ttl(),
            analysis_ttl: config.analysis_ttl(),
            quote_ttl: config.quote_ttl(),
            fetch_timeout: config.fetch_timeout(),
            fetch_threads: config.source.fetch_threads,
            preload: config.preload_config(),
        }
    }
}

/// Market-data source named by the config.
pub fn build_source(section: &SourceSection) -> Result<Arc<dyn MarketDataSource>, ServiceError> {
    let source: Arc<dyn MarketDataSource> = match section.kind {
        SourceKind::Synthetic => Arc::new(SyntheticSource::new()),
        SourceKind::Csv => {
            let dir = section.csv_dir.clone().ok_or_else(|| {
                ServiceError::Startup("source.csv_dir is required for the csv source".into())
            })?;
            Arc::new(CsvSource::new(dir))
        }
        SourceKind::Yahoo => {
            let breaker = Arc::new(CircuitBreaker::with_threshold(
                Duration::from_secs(section.breaker_cooldown_secs),
                section.breaker_threshold,
            ));
            Arc::new(YahooSource::new(breaker).map_err(|e| ServiceError::Startup(e.to_string()))?)
        }
    };
    Ok(source)
}

pub struct QuoteService {
    cache: Arc<TieredCache>,
    source: TimedSource,
    analysis: AnalysisCache,
    preloader: Preloader,
    durable: Option<Arc<dyn DurableStore>>,
    options: ServiceOptions,
}

impl QuoteService {
    pub fn new(
        cache: Arc<TieredCache>,
        source: Arc<dyn MarketDataSource>,
        options: ServiceOptions,
    ) -> Result<Self, ServiceError> {
        let timed = TimedSource::new(
            Arc::clone(&source),
            options.fetch_timeout,
            options.fetch_threads.max(1),
        )
        .map_err(|e| ServiceError::Startup(e.to_string()))?;
        let preloader = Preloader::new(Arc::clone(&cache), source, options.preload.clone())?;
        Ok(Self {
            analysis: AnalysisCache::new(Arc::clone(&cache), options.analysis_ttl),
            cache,
            source: timed,
            preloader,
            durable: None,
            options,
        })
    }

    /// Report row counts of this store in `cache_status`.
    pub fn with_durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(store);
        self
    }

    /// Build the tiers, the source and the service from a configuration.
    pub fn from_config(config: &QuoteCacheConfig) -> Result<Self, ServiceError> {
        config.validate()?;
        let mut builder = TieredCache::builder(config.cache_config());
        if config.distributed.enabled {
            builder = builder.distributed(Arc::new(MemoryKvStore::new()));
        }
        let mut durable: Option<Arc<dyn DurableStore>> = None;
        if config.durable.enabled {
            let store = SqliteStore::open(&config.durable.path).map_err(|e| {
                ServiceError::Startup(format!(
                    "could not open {}: {e}",
                    config.durable.path.display()
                ))
            })?;
            let store: Arc<dyn DurableStore> = Arc::new(store);
            builder = builder.durable(Arc::clone(&store));
            durable = Some(store);
        }
        let cache = Arc::new(builder.build()?);
        let source = build_source(&config.source)?;
        info!(
            source = source.name(),
            distributed = config.distributed.enabled,
            durable = config.durable.enabled,
            "quote service ready"
        );

        let service = Self::new(cache, source, ServiceOptions::from_config(config))?;
        Ok(match durable {
            Some(store) => service.with_durable_store(store),
            None => service,
        })
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    pub fn options(&self) -> &ServiceOptions {
        &self.options
    }

    /// Bars for a query. A cached series is served as is; otherwise the
    /// source is fetched within the timeout and a non-empty result is
    /// written back. An empty series is returned but never cached.
    pub fn bars(&self, query: &BarsQuery) -> Result<Served<Vec<OhlcBar>>, ServiceError> {
        let started = Instant::now();
        query.validate()?;
        let key = query.cache_key()?;

        if let Some((bars, tier)) = self.cache.get_json::<Vec<OhlcBar>>(&key) {
            debug!(%key, %tier, bars = bars.len(), "bars served from cache");
            return Ok(Served::hit(bars, tier, started.elapsed()));
        }

        let bars = self.source.fetch(query).map_err(|e| {
            warn!(symbol = %query.symbol, error = %e, "bar fetch failed");
            e
        })?;
        if bars.is_empty() {
            debug!(%key, "source returned no bars, not caching");
        } else {
            self.cache.set_json(
                &key,
                &bars,
                self.options.bars_ttl,
                Some(query.symbol.as_str()),
            )?;
        }
        debug!(%key, bars = bars.len(), source = self.source.name(), "bars fetched");
        Ok(Served::fetched(bars, started.elapsed()))
    }

    /// Latest quotes, one per distinct symbol in sorted order. The whole
    /// batch is cached under one key for the quote TTL.
    pub fn quotes(&self, query: &QuotesQuery) -> Result<Served<Vec<Quote>>, ServiceError> {
        let started = Instant::now();
        query.validate()?;
        let key = query.cache_key()?;

        if let Some((quotes, tier)) = self.cache.get_json::<Vec<Quote>>(&key) {
            debug!(%key, %tier, quotes = quotes.len(), "quotes served from cache");
            return Ok(Served::hit(quotes, tier, started.elapsed()));
        }

        let symbols = query.distinct_symbols();
        let as_of = chrono::Local::now().date_naive();
        let quotes = self.source.fetch_quotes(&symbols, as_of).map_err(|e| {
            warn!(symbols = symbols.len(), error = %e, "quote fetch failed");
            e
        })?;
        self.cache.set_json_in(
            &key,
            &quotes,
            self.options.quote_ttl,
            None,
            TierSelection::MemoryAndDistributed,
        )?;
        debug!(%key, quotes = quotes.len(), source = self.source.name(), "quotes fetched");
        Ok(Served::fetched(quotes, started.elapsed()))
    }

    /// Indicator analysis over the query's bars. `cache_hit` reports whether
    /// the analysis itself came from the cache.
    pub fn analysis(&self, query: &AnalysisQuery) -> Result<Served<AnalysisSummary>, ServiceError> {
        let started = Instant::now();
        query.request.validate()?;
        let bars = self.bars(&query.bars)?;
        let cached = self.analysis.get_or_compute(
            &query.bars.symbol,
            query.bars.granularity,
            &bars.data,
            &query.request,
        )?;
        let elapsed = started.elapsed();
        Ok(match cached.hit {
            Some(tier) => Served::hit(cached.summary, tier, elapsed),
            None => Served::fetched(cached.summary, elapsed),
        })
    }

    pub fn cache_status(&self) -> CacheStatus {
        let durable_entries = self.durable.as_ref().and_then(|store| match store.len() {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(store = store.name(), error = %e, "could not count durable entries");
                None
            }
        });
        CacheStatus {
            source: self.source.name().to_string(),
            source_available: self.source.is_available(),
            durable_entries,
            stats: self.cache.stats(),
        }
    }

    /// Invalidate everything, or every entry of one symbol, in the selected tiers.
    pub fn clear_cache(&self, tiers: TierSelection, symbol: Option<&str>) -> ClearReport {
        let symbol = symbol.map(|s| s.trim().to_uppercase());
        let pattern = match &symbol {
            Some(s) => KeyPattern::Scope(s.clone()),
            None => KeyPattern::All,
        };
        let report = self.cache.invalidate(&pattern, tiers);
        info!(?symbol, ?tiers, memory_removed = report.memory_removed, "cache cleared");
        ClearReport {
            symbol,
            memory_removed: report.memory_removed,
            queued: report.queued,
        }
    }

    /// Sweep L1 and queue an L3 prune. Returns the L1 count.
    pub fn prune_expired(&self) -> usize {
        self.cache.prune_expired()
    }

    pub fn preload(
        &self,
        request: &PreloadRequest,
        progress: &dyn PreloadProgress,
    ) -> PreloadReport {
        self.preloader.run(request, progress)
    }

    /// Wait for queued writes to reach L2/L3.
    pub fn flush(&self) {
        self.cache.flush();
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use quotecache_core::analysis::IndicatorKind;
    use quotecache_core::cache::TieredCacheConfig;
    use quotecache_core::domain::Granularity;

    fn service() -> QuoteService {
        let cache = Arc::new(TieredCache::in_memory(TieredCacheConfig::default()).unwrap());
        QuoteService::new(cache, Arc::new(SyntheticSource::new()), ServiceOptions::default())
            .unwrap()
    }

    fn query(symbol: &str) -> BarsQuery {
        BarsQuery::new(
            symbol,
            Granularity::Day,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        )
    }

    #[test]
    fn inverted_range_is_a_caller_error() {
        let mut q = query("SPY");
        std::mem::swap(&mut q.start, &mut q.end);
        let err = service().bars(&q).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
        assert_eq!(err.ret_code(), RET_CALLER_ERROR);
    }

    #[test]
    fn second_bars_call_is_an_l1_hit() {
        let service = service();
        let first = service.bars(&query("spy")).unwrap();
        assert!(!first.cache_hit);
        assert_eq!(first.source, DataSourceTag::Source);
        let second = service.bars(&query("SPY")).unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.tier, Some(Tier::Memory));
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn quotes_share_a_cache_entry_across_symbol_order() {
        let service = service();
        let first = service.quotes(&QuotesQuery::new(["MSFT", "aapl"])).unwrap();
        assert!(!first.cache_hit);
        let symbols: Vec<_> = first.data.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, ["AAPL", "MSFT"]);

        let second = service.quotes(&QuotesQuery::new(["AAPL", "MSFT"])).unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.tier, Some(Tier::Memory));
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn empty_symbol_list_is_a_caller_error() {
        let err = service()
            .quotes(&QuotesQuery::new(Vec::<String>::new()))
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidRequest(_)));
    }

    #[test]
    fn empty_request_is_rejected_before_fetching() {
        let q = AnalysisQuery {
            bars: query("SPY"),
            request: AnalysisRequest::new(Vec::<IndicatorKind>::new()),
        };
        let err = service().analysis(&q).unwrap_err();
        assert!(matches!(err, ServiceError::Engine(EngineError::EmptyRequest)));
    }

    #[test]
    fn clear_by_symbol_only_drops_that_symbol() {
        let service = service();
        service.bars(&query("SPY")).unwrap();
        service.bars(&query("QQQ")).unwrap();
        let report = service.clear_cache(TierSelection::All, Some("spy"));
        assert_eq!(report.memory_removed, 1);
        assert_eq!(report.symbol.as_deref(), Some("SPY"));
        assert!(!service.bars(&query("SPY")).unwrap().cache_hit);
        assert!(service.bars(&query("QQQ")).unwrap().cache_hit);
    }
}
