//! Serializable analysis payloads.
//!
//! An unavailable value is `None` and serializes as JSON `null`; it is
//! never dropped from a series and never replaced by a number.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::request::{IndicatorClass, IndicatorKind};
use super::signal::{Signal, Verdict};
use crate::domain::OhlcBar;
use crate::indicators::{AdxValue, BandValue, KdjValue, MacdValue};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point<T> {
    pub timestamp: NaiveDateTime,
    pub value: Option<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorResult<T> {
    pub name: String,
    pub series: Vec<Point<T>>,
    pub current: Option<T>,
    pub signal: Signal,
}

impl<T: Copy> IndicatorResult<T> {
    /// Pair `values` with bar timestamps; `current` is the last value.
    pub fn from_series(
        name: impl Into<String>,
        bars: &[OhlcBar],
        values: Vec<Option<T>>,
        signal: Signal,
    ) -> Self {
        let current = values.last().copied().flatten();
        let series = bars
            .iter()
            .zip(values)
            .map(|(bar, value)| Point {
                timestamp: bar.timestamp,
                value,
            })
            .collect();
        Self {
            name: name.into(),
            series,
            current,
            signal,
        }
    }

    /// Value one bar before the last.
    pub fn previous(&self) -> Option<T> {
        let n = self.series.len();
        if n < 2 {
            return None;
        }
        self.series[n - 2].value
    }
}

/// Several lines of the same indicator family with one combined signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSet {
    pub lines: Vec<IndicatorResult<f64>>,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorOutput {
    MovingAverages(LineSet),
    Ema(LineSet),
    Macd(IndicatorResult<MacdValue>),
    Adx(IndicatorResult<AdxValue>),
    Rsi(IndicatorResult<f64>),
    Bollinger(IndicatorResult<BandValue>),
    Kdj(IndicatorResult<KdjValue>),
    Atr(IndicatorResult<f64>),
    Obv(IndicatorResult<f64>),
    Vwap(IndicatorResult<f64>),
}

impl IndicatorOutput {
    pub fn kind(&self) -> IndicatorKind {
        match self {
            IndicatorOutput::MovingAverages(_) => IndicatorKind::MovingAverages,
            IndicatorOutput::Ema(_) => IndicatorKind::Ema,
            IndicatorOutput::Macd(_) => IndicatorKind::Macd,
            IndicatorOutput::Adx(_) => IndicatorKind::Adx,
            IndicatorOutput::Rsi(_) => IndicatorKind::Rsi,
            IndicatorOutput::Bollinger(_) => IndicatorKind::Bollinger,
            IndicatorOutput::Kdj(_) => IndicatorKind::Kdj,
            IndicatorOutput::Atr(_) => IndicatorKind::Atr,
            IndicatorOutput::Obv(_) => IndicatorKind::Obv,
            IndicatorOutput::Vwap(_) => IndicatorKind::Vwap,
        }
    }

    pub fn signal(&self) -> Signal {
        match self {
            IndicatorOutput::MovingAverages(set) | IndicatorOutput::Ema(set) => set.signal,
            IndicatorOutput::Macd(r) => r.signal,
            IndicatorOutput::Adx(r) => r.signal,
            IndicatorOutput::Bollinger(r) => r.signal,
            IndicatorOutput::Kdj(r) => r.signal,
            IndicatorOutput::Rsi(r)
            | IndicatorOutput::Atr(r)
            | IndicatorOutput::Obv(r)
            | IndicatorOutput::Vwap(r) => r.signal,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteCount {
    pub bullish: usize,
    pub bearish: usize,
    pub neutral: usize,
}

impl VoteCount {
    pub fn tally<'a>(outputs: impl IntoIterator<Item = &'a IndicatorOutput>) -> Self {
        let mut votes = VoteCount::default();
        for output in outputs {
            match output.signal().vote() {
                Some(Verdict::Bullish) => votes.bullish += 1,
                Some(Verdict::Bearish) => votes.bearish += 1,
                Some(Verdict::Neutral) => votes.neutral += 1,
                None => {}
            }
        }
        votes
    }

    /// Majority of bullish vs bearish; a tie is neutral.
    pub fn verdict(&self) -> Verdict {
        if self.bullish > self.bearish {
            Verdict::Bullish
        } else if self.bearish > self.bullish {
            Verdict::Bearish
        } else {
            Verdict::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub data_points: usize,
    /// Timestamp of the last bar analysed.
    pub as_of: Option<NaiveDateTime>,
    pub trend: Vec<IndicatorOutput>,
    pub momentum: Vec<IndicatorOutput>,
    pub volatility: Vec<IndicatorOutput>,
    pub volume: Vec<IndicatorOutput>,
    pub votes: VoteCount,
    pub verdict: Verdict,
}

impl AnalysisSummary {
    /// Group outputs by class and count votes.
    pub fn assemble(bars: &[OhlcBar], outputs: Vec<IndicatorOutput>) -> Self {
        let votes = VoteCount::tally(&outputs);
        let mut summary = Self {
            data_points: bars.len(),
            as_of: bars.last().map(|b| b.timestamp),
            trend: Vec::new(),
            momentum: Vec::new(),
            volatility: Vec::new(),
            volume: Vec::new(),
            votes,
            verdict: votes.verdict(),
        };
        for output in outputs {
            match output.kind().class() {
                IndicatorClass::Trend => summary.trend.push(output),
                IndicatorClass::Momentum => summary.momentum.push(output),
                IndicatorClass::Volatility => summary.volatility.push(output),
                IndicatorClass::Volume => summary.volume.push(output),
            }
        }
        summary
    }

    pub fn outputs(&self) -> impl Iterator<Item = &IndicatorOutput> {
        self.trend
            .iter()
            .chain(&self.momentum)
            .chain(&self.volatility)
            .chain(&self.volume)
    }

    pub fn output(&self, kind: IndicatorKind) -> Option<&IndicatorOutput> {
        self.outputs().find(|o| o.kind() == kind)
    }
}
