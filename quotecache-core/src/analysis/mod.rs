//! Technical analysis over bar series.
//!
//! [`IndicatorEngine`] turns a validated series and an [`AnalysisRequest`] into
//! an [`AnalysisSummary`]: one tagged output per requested indicator, grouped
//! by class, with a signal per output and an overall verdict.
//! [`AnalysisCache`] memoizes the engine behind the tiered cache.

pub mod cache;
pub mod engine;
pub mod request;
pub mod result;
pub mod signal;

pub use cache::{AnalysisCache, AnalysisError, CachedAnalysis, ANALYSIS_ENDPOINT};
pub use engine::{EngineError, IndicatorEngine};
pub use request::{AnalysisRequest, IndicatorClass, IndicatorKind, IndicatorParams};
pub use result::{AnalysisSummary, IndicatorOutput, IndicatorResult, LineSet, Point, VoteCount};
pub use signal::{Signal, Verdict};
