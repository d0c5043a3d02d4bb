//! Memoized analysis on top of the tiered cache.
//!
//! The key covers everything the output depends on: symbol, granularity, the
//! requested kinds, every parameter, the bar count and the last bar timestamp.
//! New bars change the key, so staleness is left to the TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use thiserror::Error;
use tracing::debug;

use super::engine::{EngineError, IndicatorEngine};
use super::request::AnalysisRequest;
use super::result::AnalysisSummary;
use crate::cache::{CacheError, Tier, TieredCache};
use crate::domain::{Granularity, OhlcBar};
use crate::key::{CacheKey, CacheKeyBuilder, KeyError};

pub const ANALYSIS_ENDPOINT: &str = "analysis";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("could not build analysis key: {0}")]
    Key(#[from] KeyError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedAnalysis {
    pub summary: AnalysisSummary,
    /// Tier that served the analysis; `None` when it was computed.
    pub hit: Option<Tier>,
}

impl CachedAnalysis {
    pub fn cache_hit(&self) -> bool {
        self.hit.is_some()
    }
}

pub struct AnalysisCache {
    cache: Arc<TieredCache>,
    engine: IndicatorEngine,
    ttl: Duration,
}

impl AnalysisCache {
    pub fn new(cache: Arc<TieredCache>, ttl: Duration) -> Self {
        Self {
            cache,
            engine: IndicatorEngine::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn key(
        symbol: &str,
        granularity: Granularity,
        bars: &[OhlcBar],
        request: &AnalysisRequest,
    ) -> Result<CacheKey, KeyError> {
        let p = &request.params;
        let last: Option<NaiveDateTime> = bars.last().map(|b| b.timestamp);
        CacheKeyBuilder::new(ANALYSIS_ENDPOINT)
            .param("symbol", symbol.to_uppercase())
            .param("granularity", granularity.as_str())
            .set("kinds", request.kinds.iter().map(|k| k.as_str()))
            .set("ma_windows", p.ma_windows.iter().copied())
            .param("ema_short", p.ema_short)
            .param("ema_long", p.ema_long)
            .param("macd_fast", p.macd_fast)
            .param("macd_slow", p.macd_slow)
            .param("macd_signal", p.macd_signal)
            .param("adx_period", p.adx_period)
            .param("adx_trend_threshold", p.adx_trend_threshold)
            .param("rsi_period", p.rsi_period)
            .param("rsi_overbought", p.rsi_overbought)
            .param("rsi_oversold", p.rsi_oversold)
            .param("bollinger_period", p.bollinger_period)
            .param("bollinger_k", p.bollinger_k)
            .param("kdj_period", p.kdj_period)
            .param("kdj_k_smoothing", p.kdj_k_smoothing)
            .param("kdj_d_smoothing", p.kdj_d_smoothing)
            .param("kdj_overbought", p.kdj_overbought)
            .param("kdj_oversold", p.kdj_oversold)
            .param("atr_period", p.atr_period)
            .param("obv_lookback", p.obv_lookback)
            .param("bar_count", bars.len())
            .param("as_of", last.map(|t| t.to_string()).unwrap_or_default())
            .build()
    }

    /// Serve a cached analysis or compute and store it.
    ///
    /// The request is validated before the cache is consulted, so an invalid
    /// request is an error even when an old entry would match.
    pub fn get_or_compute(
        &self,
        symbol: &str,
        granularity: Granularity,
        bars: &[OhlcBar],
        request: &AnalysisRequest,
    ) -> Result<CachedAnalysis, AnalysisError> {
        request.validate()?;
        let key = Self::key(symbol, granularity, bars, request)?;

        if let Some((summary, tier)) = self.cache.get_json::<AnalysisSummary>(&key) {
            debug!(%key, %tier, "analysis cache hit");
            return Ok(CachedAnalysis {
                summary,
                hit: Some(tier),
            });
        }

        let summary = self.engine.compute(bars, request)?;
        let scope = symbol.to_uppercase();
        self.cache
            .set_json(&key, &summary, self.ttl, Some(scope.as_str()))?;
        debug!(%key, data_points = summary.data_points, "analysis computed");
        Ok(CachedAnalysis { summary, hit: None })
    }
}
