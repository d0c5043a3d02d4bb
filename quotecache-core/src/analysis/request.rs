//! What to compute: indicator kinds and their parameters.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::engine::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    MovingAverages,
    Ema,
    Macd,
    Adx,
    Rsi,
    Bollinger,
    Kdj,
    Atr,
    Obv,
    Vwap,
}

/// Grouping used by the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorClass {
    Trend,
    Momentum,
    Volatility,
    Volume,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 10] = [
        IndicatorKind::MovingAverages,
        IndicatorKind::Ema,
        IndicatorKind::Macd,
        IndicatorKind::Adx,
        IndicatorKind::Rsi,
        IndicatorKind::Bollinger,
        IndicatorKind::Kdj,
        IndicatorKind::Atr,
        IndicatorKind::Obv,
        IndicatorKind::Vwap,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            IndicatorKind::MovingAverages => "moving_averages",
            IndicatorKind::Ema => "ema",
            IndicatorKind::Macd => "macd",
            IndicatorKind::Adx => "adx",
            IndicatorKind::Rsi => "rsi",
            IndicatorKind::Bollinger => "bollinger",
            IndicatorKind::Kdj => "kdj",
            IndicatorKind::Atr => "atr",
            IndicatorKind::Obv => "obv",
            IndicatorKind::Vwap => "vwap",
        }
    }

    pub fn class(self) -> IndicatorClass {
        match self {
            IndicatorKind::MovingAverages
            | IndicatorKind::Ema
            | IndicatorKind::Macd
            | IndicatorKind::Adx => IndicatorClass::Trend,
            IndicatorKind::Rsi | IndicatorKind::Kdj => IndicatorClass::Momentum,
            IndicatorKind::Bollinger | IndicatorKind::Atr => IndicatorClass::Volatility,
            IndicatorKind::Obv | IndicatorKind::Vwap => IndicatorClass::Volume,
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown indicator '{0}'")]
pub struct ParseIndicatorError(pub String);

impl FromStr for IndicatorKind {
    type Err = ParseIndicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "ma" | "sma" | "moving_averages" => Ok(IndicatorKind::MovingAverages),
            "ema" => Ok(IndicatorKind::Ema),
            "macd" => Ok(IndicatorKind::Macd),
            "adx" => Ok(IndicatorKind::Adx),
            "rsi" => Ok(IndicatorKind::Rsi),
            "boll" | "bollinger" | "bollinger_bands" => Ok(IndicatorKind::Bollinger),
            "kdj" => Ok(IndicatorKind::Kdj),
            "atr" => Ok(IndicatorKind::Atr),
            "obv" => Ok(IndicatorKind::Obv),
            "vwap" => Ok(IndicatorKind::Vwap),
            _ => Err(ParseIndicatorError(s.to_string())),
        }
    }
}

/// Parameters for every indicator. Only the ones whose kind is requested are used,
/// but all of them feed the analysis cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub ma_windows: Vec<usize>,
    pub ema_short: usize,
    pub ema_long: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
    pub adx_period: usize,
    /// ADX above this marks a trending market.
    pub adx_trend_threshold: f64,
    pub rsi_period: usize,
    pub rsi_overbought: f64,
    pub rsi_oversold: f64,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub kdj_period: usize,
    pub kdj_k_smoothing: usize,
    pub kdj_d_smoothing: usize,
    pub kdj_overbought: f64,
    pub kdj_oversold: f64,
    pub atr_period: usize,
    /// Bars spanned by the OBV direction check.
    pub obv_lookback: usize,
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            ma_windows: vec![5, 10, 20, 30, 60],
            ema_short: 12,
            ema_long: 26,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
            adx_period: 14,
            adx_trend_threshold: 25.0,
            rsi_period: 14,
            rsi_overbought: 70.0,
            rsi_oversold: 30.0,
            bollinger_period: 20,
            bollinger_k: 2.0,
            kdj_period: 9,
            kdj_k_smoothing: 3,
            kdj_d_smoothing: 3,
            kdj_overbought: 80.0,
            kdj_oversold: 20.0,
            atr_period: 14,
            obv_lookback: 5,
        }
    }
}

fn invalid(name: &'static str, reason: impl Into<String>) -> EngineError {
    EngineError::InvalidParam {
        name,
        reason: reason.into(),
    }
}

fn positive(name: &'static str, value: usize) -> Result<(), EngineError> {
    if value == 0 {
        Err(invalid(name, "must be at least 1"))
    } else {
        Ok(())
    }
}

fn thresholds(
    name: &'static str,
    overbought: f64,
    oversold: f64,
) -> Result<(), EngineError> {
    if !overbought.is_finite() || !oversold.is_finite() {
        return Err(invalid(name, "thresholds must be finite"));
    }
    if oversold >= overbought {
        return Err(invalid(
            name,
            format!("oversold {oversold} must be below overbought {overbought}"),
        ));
    }
    Ok(())
}

impl IndicatorParams {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ma_windows.is_empty() {
            return Err(invalid("ma_windows", "at least one window is required"));
        }
        if self.ma_windows.contains(&0) {
            return Err(invalid("ma_windows", "windows must be at least 1"));
        }
        positive("ema_short", self.ema_short)?;
        positive("ema_long", self.ema_long)?;
        if self.ema_short >= self.ema_long {
            return Err(invalid("ema_short", "must be shorter than ema_long"));
        }
        positive("macd_fast", self.macd_fast)?;
        positive("macd_slow", self.macd_slow)?;
        positive("macd_signal", self.macd_signal)?;
        if self.macd_fast >= self.macd_slow {
            return Err(invalid("macd_fast", "must be shorter than macd_slow"));
        }
        positive("adx_period", self.adx_period)?;
        if !(self.adx_trend_threshold.is_finite() && (0.0..100.0).contains(&self.adx_trend_threshold)) {
            return Err(invalid("adx_trend_threshold", "must be within [0, 100)"));
        }
        positive("rsi_period", self.rsi_period)?;
        thresholds("rsi", self.rsi_overbought, self.rsi_oversold)?;
        positive("bollinger_period", self.bollinger_period)?;
        if !(self.bollinger_k.is_finite() && self.bollinger_k > 0.0) {
            return Err(invalid("bollinger_k", "must be a positive number"));
        }
        positive("kdj_period", self.kdj_period)?;
        positive("kdj_k_smoothing", self.kdj_k_smoothing)?;
        positive("kdj_d_smoothing", self.kdj_d_smoothing)?;
        thresholds("kdj", self.kdj_overbought, self.kdj_oversold)?;
        positive("atr_period", self.atr_period)?;
        if self.obv_lookback < 2 {
            return Err(invalid("obv_lookback", "must span at least 2 bars"));
        }
        Ok(())
    }

    /// MA windows sorted ascending without duplicates.
    pub fn ma_windows_sorted(&self) -> Vec<usize> {
        let set: BTreeSet<usize> = self.ma_windows.iter().copied().collect();
        set.into_iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub kinds: BTreeSet<IndicatorKind>,
    #[serde(default)]
    pub params: IndicatorParams,
}

impl AnalysisRequest {
    pub fn new(kinds: impl IntoIterator<Item = IndicatorKind>) -> Self {
        Self {
            kinds: kinds.into_iter().collect(),
            params: IndicatorParams::default(),
        }
    }

    /// Every indicator with default parameters.
    pub fn all() -> Self {
        Self::new(IndicatorKind::ALL)
    }

    pub fn with_params(mut self, params: IndicatorParams) -> Self {
        self.params = params;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.kinds.is_empty() {
            return Err(EngineError::EmptyRequest);
        }
        self.params.validate()
    }
}
