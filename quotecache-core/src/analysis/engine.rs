//! Indicator engine: pure computation over a validated bar series.
//!
//! Identical bars and request produce an identical summary, and therefore
//! byte-identical serialized output.

use thiserror::Error;

use super::request::{AnalysisRequest, IndicatorKind, IndicatorParams};
use super::result::{AnalysisSummary, IndicatorOutput, IndicatorResult, LineSet};
use super::signal::{self, Signal};
use crate::domain::{validate_series, OhlcBar, SeriesError};
use crate::indicators::{
    Adx, Atr, Bollinger, Ema, Indicator, Kdj, Macd, Obv, Rsi, Sma, Vwap,
};

/// Caller errors: the request or the series is unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no indicators requested")]
    EmptyRequest,

    #[error("invalid parameter {name}: {reason}")]
    InvalidParam { name: &'static str, reason: String },

    #[error("bar series rejected: {0}")]
    Series(#[from] SeriesError),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorEngine;

impl IndicatorEngine {
    pub fn new() -> Self {
        Self
    }

    /// Compute every requested indicator over `bars`.
    ///
    /// Too few bars is not an error: the affected outputs are all `None`
    /// with an `Unavailable` signal.
    pub fn compute(
        &self,
        bars: &[OhlcBar],
        request: &AnalysisRequest,
    ) -> Result<AnalysisSummary, EngineError> {
        request.validate()?;
        validate_series(bars)?;

        let params = &request.params;
        let outputs = request
            .kinds
            .iter()
            .map(|&kind| compute_kind(kind, bars, params))
            .collect();
        Ok(AnalysisSummary::assemble(bars, outputs))
    }
}

fn last_close(bars: &[OhlcBar]) -> Option<f64> {
    bars.last().map(|b| b.close).filter(|c| !c.is_nan())
}

fn line<I: Indicator<Output = f64>>(indicator: &I, bars: &[OhlcBar]) -> IndicatorResult<f64> {
    let values = indicator.compute(bars);
    let current = values.last().copied().flatten();
    let signal = signal::above_below(last_close(bars), current);
    IndicatorResult::from_series(indicator.name(), bars, values, signal)
}

fn compute_kind(kind: IndicatorKind, bars: &[OhlcBar], p: &IndicatorParams) -> IndicatorOutput {
    match kind {
        IndicatorKind::MovingAverages => {
            let lines: Vec<_> = p
                .ma_windows_sorted()
                .into_iter()
                .map(|w| line(&Sma::new(w), bars))
                .collect();
            let signal = match (lines.first(), lines.last()) {
                (Some(shortest), Some(longest)) => {
                    signal::above_below(shortest.current, longest.current)
                }
                _ => Signal::Unavailable,
            };
            IndicatorOutput::MovingAverages(LineSet { lines, signal })
        }
        IndicatorKind::Ema => {
            let short = line(&Ema::new(p.ema_short), bars);
            let long = line(&Ema::new(p.ema_long), bars);
            let signal = signal::above_below(short.current, long.current);
            IndicatorOutput::Ema(LineSet {
                lines: vec![short, long],
                signal,
            })
        }
        IndicatorKind::Macd => {
            let macd = Macd::new(p.macd_fast, p.macd_slow, p.macd_signal);
            let mut result =
                IndicatorResult::from_series(macd.name(), bars, macd.compute(bars), Signal::Neutral);
            result.signal = signal::macd(
                result.previous().map(|v| v.histogram),
                result.current.map(|v| v.histogram),
            );
            IndicatorOutput::Macd(result)
        }
        IndicatorKind::Adx => {
            let adx = Adx::new(p.adx_period);
            let values = adx.compute(bars);
            let signal = signal::adx(values.last().copied().flatten(), p.adx_trend_threshold);
            IndicatorOutput::Adx(IndicatorResult::from_series(adx.name(), bars, values, signal))
        }
        IndicatorKind::Rsi => {
            let rsi = Rsi::new(p.rsi_period);
            let values = rsi.compute(bars);
            let signal = signal::threshold(
                values.last().copied().flatten(),
                p.rsi_overbought,
                p.rsi_oversold,
            );
            IndicatorOutput::Rsi(IndicatorResult::from_series(rsi.name(), bars, values, signal))
        }
        IndicatorKind::Bollinger => {
            let bb = Bollinger::new(p.bollinger_period, p.bollinger_k);
            let values = bb.compute(bars);
            let signal = signal::bollinger(last_close(bars), values.last().copied().flatten());
            IndicatorOutput::Bollinger(IndicatorResult::from_series(bb.name(), bars, values, signal))
        }
        IndicatorKind::Kdj => {
            let kdj = Kdj::new(p.kdj_period, p.kdj_k_smoothing, p.kdj_d_smoothing);
            let mut result =
                IndicatorResult::from_series(kdj.name(), bars, kdj.compute(bars), Signal::Neutral);
            result.signal = signal::kdj(
                result.previous(),
                result.current,
                p.kdj_overbought,
                p.kdj_oversold,
            );
            IndicatorOutput::Kdj(result)
        }
        IndicatorKind::Atr => {
            let atr = Atr::new(p.atr_period);
            let values = atr.compute(bars);
            let signal = signal::non_directional(values.last().copied().flatten());
            IndicatorOutput::Atr(IndicatorResult::from_series(atr.name(), bars, values, signal))
        }
        IndicatorKind::Obv => {
            let obv = Obv::new();
            let values = obv.compute(bars);
            let signal = obv_signal(&values, p.obv_lookback);
            IndicatorOutput::Obv(IndicatorResult::from_series(obv.name(), bars, values, signal))
        }
        IndicatorKind::Vwap => {
            let vwap = Vwap::new();
            let values = vwap.compute(bars);
            let signal = signal::above_below(last_close(bars), values.last().copied().flatten());
            IndicatorOutput::Vwap(IndicatorResult::from_series(vwap.name(), bars, values, signal))
        }
    }
}

/// OBV direction across the last `span` bars.
fn obv_signal(values: &[Option<f64>], span: usize) -> Signal {
    if values.len() < span {
        return Signal::Unavailable;
    }
    let start = values[values.len() - span];
    let end = values.last().copied().flatten();
    signal::above_below(end, start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Verdict;
    use crate::indicators::make_bars;

    #[test]
    fn insufficient_data_is_unavailable_not_error() {
        let bars = make_bars(&[10.0, 11.0, 12.0]);
        let summary = IndicatorEngine::new()
            .compute(&bars, &AnalysisRequest::new([IndicatorKind::Rsi]))
            .unwrap();
        let rsi = summary.output(IndicatorKind::Rsi).unwrap();
        assert_eq!(rsi.signal(), Signal::Unavailable);
        let IndicatorOutput::Rsi(result) = rsi else {
            panic!("expected rsi output");
        };
        assert_eq!(result.series.len(), 3);
        assert!(result.series.iter().all(|p| p.value.is_none()));
        assert_eq!(summary.verdict, Verdict::Neutral);
    }

    #[test]
    fn out_of_order_series_rejected() {
        let mut bars = make_bars(&[10.0, 11.0, 12.0]);
        bars.swap(0, 1);
        let err = IndicatorEngine::new()
            .compute(&bars, &AnalysisRequest::all())
            .unwrap_err();
        assert!(matches!(err, EngineError::Series(_)));
    }

    #[test]
    fn outputs_grouped_by_class() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 0.5).collect();
        let bars = make_bars(&closes);
        let summary = IndicatorEngine::new()
            .compute(&bars, &AnalysisRequest::all())
            .unwrap();
        assert_eq!(summary.trend.len(), 4);
        assert_eq!(summary.momentum.len(), 2);
        assert_eq!(summary.volatility.len(), 2);
        assert_eq!(summary.volume.len(), 2);
        assert_eq!(summary.data_points, 80);
        assert_eq!(summary.as_of, bars.last().map(|b| b.timestamp));
    }

    #[test]
    fn steady_uptrend_is_bullish() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64).collect();
        let bars = make_bars(&closes);
        let request = AnalysisRequest::new([
            IndicatorKind::MovingAverages,
            IndicatorKind::Ema,
            IndicatorKind::Adx,
            IndicatorKind::Obv,
            IndicatorKind::Vwap,
        ]);
        let summary = IndicatorEngine::new().compute(&bars, &request).unwrap();
        for output in summary.outputs() {
            assert_eq!(output.signal(), Signal::Bullish, "{:?}", output.kind());
        }
        assert_eq!(summary.verdict, Verdict::Bullish);
    }

    #[test]
    fn adx_reports_trend_direction() {
        let down: Vec<f64> = (0..60).map(|i| 200.0 - i as f64).collect();
        let request = AnalysisRequest::new([IndicatorKind::Adx]);
        let summary = IndicatorEngine::new()
            .compute(&make_bars(&down), &request)
            .unwrap();
        let IndicatorOutput::Adx(result) = &summary.trend[0] else {
            panic!("expected adx output");
        };
        assert_eq!(result.name, "adx_14");
        assert_eq!(result.signal, Signal::Bearish);
        assert!(result.series[..27].iter().all(|p| p.value.is_none()));
        assert!(result.series[27].value.is_some());

        let flat = make_bars(&[50.0; 60]);
        let summary = IndicatorEngine::new().compute(&flat, &request).unwrap();
        assert_eq!(summary.trend[0].signal(), Signal::Neutral);
    }

    #[test]
    fn obv_needs_span_bars() {
        assert_eq!(obv_signal(&[Some(0.0), Some(1.0)], 5), Signal::Unavailable);
        let values = [Some(0.0), Some(1.0), Some(2.0), Some(1.0), Some(-1.0)];
        assert_eq!(obv_signal(&values, 5), Signal::Bearish);
    }

    #[test]
    fn single_ma_window_is_neutral() {
        let bars = make_bars(&[1.0, 2.0, 3.0]);
        let request = AnalysisRequest::new([IndicatorKind::MovingAverages]).with_params(
            IndicatorParams {
                ma_windows: vec![2],
                ..Default::default()
            },
        );
        let summary = IndicatorEngine::new().compute(&bars, &request).unwrap();
        assert_eq!(summary.trend[0].signal(), Signal::Neutral);
    }
}
