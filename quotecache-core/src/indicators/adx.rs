//! ADX: Average Directional Index.
//!
//! Steps:
//! 1. +DM / -DM from consecutive bars (only the larger move counts, and only if positive)
//! 2. Rolling mean of +DM, -DM and true range over `period`
//! 3. +DI = 100 * mean(+DM) / mean(TR), -DI likewise (0 when mean(TR) is 0)
//! 4. DX = 100 * |+DI - -DI| / (+DI + -DI) (0 when both are 0)
//! 5. ADX = rolling mean of DX over `period`
//!
//! Lookback: 2 * period - 1 (bar 0 has no directional movement).

use serde::{Deserialize, Serialize};

use super::atr::true_range;
use super::{sma_of_series, Indicator};
use crate::domain::OhlcBar;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdxValue {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

#[derive(Debug, Clone)]
pub struct Adx {
    period: usize,
    name: String,
}

impl Adx {
    pub fn new(period: usize) -> Self {
        assert!(period >= 1, "ADX period must be >= 1");
        Self {
            period,
            name: format!("adx_{period}"),
        }
    }
}

/// +DM and -DM per bar. Bar 0 and bars next to a NaN high/low are `None`.
fn directional_movement(bars: &[OhlcBar]) -> (Vec<Option<f64>>, Vec<Option<f64>>) {
    let valid = |v: f64| (!v.is_nan()).then_some(v);
    let moves: Vec<Option<(f64, f64)>> = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| {
            let prev = bars.get(i.checked_sub(1)?)?;
            let up = valid(bar.high)? - valid(prev.high)?;
            let down = valid(prev.low)? - valid(bar.low)?;
            let plus = if up > down && up > 0.0 { up } else { 0.0 };
            let minus = if down > up && down > 0.0 { down } else { 0.0 };
            Some((plus, minus))
        })
        .collect();
    (
        moves.iter().map(|m| m.map(|(p, _)| p)).collect(),
        moves.iter().map(|m| m.map(|(_, n)| n)).collect(),
    )
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        0.0
    } else {
        100.0 * numerator / denominator
    }
}

impl Indicator for Adx {
    type Output = AdxValue;

    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        2 * self.period - 1
    }

    fn compute(&self, bars: &[OhlcBar]) -> Vec<Option<AdxValue>> {
        let (plus_dm, minus_dm) = directional_movement(bars);
        let tr = sma_of_series(&true_range(bars), self.period);
        let plus_dm = sma_of_series(&plus_dm, self.period);
        let minus_dm = sma_of_series(&minus_dm, self.period);

        let di: Vec<Option<(f64, f64)>> = (0..bars.len())
            .map(|i| {
                let tr = tr[i]?;
                Some((ratio(plus_dm[i]?, tr), ratio(minus_dm[i]?, tr)))
            })
            .collect();
        let dx: Vec<Option<f64>> = di
            .iter()
            .map(|d| d.map(|(plus, minus)| ratio((plus - minus).abs(), plus + minus)))
            .collect();
        let adx = sma_of_series(&dx, self.period);

        adx.iter()
            .zip(&di)
            .map(|(a, d)| {
                let (plus_di, minus_di) = (*d)?;
                Some(AdxValue {
                    adx: (*a)?,
                    plus_di,
                    minus_di,
                })
            })
            .collect()
    }
}
