//! CSV directory source.
//!
//! Reads `<dir>/<SYMBOL>_<granularity>.csv` with a header row
//! `timestamp,open,high,low,close,volume`. Timestamps are either
//! `YYYY-MM-DD` or `YYYY-MM-DD HH:MM:SS`. Rows are sorted on load; duplicate
//! timestamps keep the last row.

use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;

use super::source::{DataError, MarketDataSource};
use crate::domain::{Granularity, OhlcBar};

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    volume: Option<f64>,
}

fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

#[derive(Debug, Clone)]
pub struct CsvSource {
    dir: PathBuf,
}

impl CsvSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, symbol: &str, granularity: Granularity) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", symbol.to_uppercase(), granularity.as_str()))
    }

    fn read_file(path: &Path) -> Result<Vec<OhlcBar>, DataError> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| DataError::Csv(format!("{}: {e}", path.display())))?;
        let mut bars = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.map_err(|e| DataError::Csv(format!("{}: {e}", path.display())))?;
            let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| {
                DataError::Csv(format!(
                    "{} row {}: bad timestamp '{}'",
                    path.display(),
                    line + 2,
                    row.timestamp
                ))
            })?;
            bars.push(OhlcBar {
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume.unwrap_or(0.0).max(0.0).round() as u64,
            });
        }
        // Stable sort keeps file order among duplicates; the last one wins.
        bars.sort_by_key(|b| b.timestamp);
        let mut deduped: Vec<OhlcBar> = Vec::with_capacity(bars.len());
        for bar in bars {
            match deduped.last_mut() {
                Some(last) if last.timestamp == bar.timestamp => *last = bar,
                _ => deduped.push(bar),
            }
        }
        Ok(deduped)
    }
}

impl MarketDataSource for CsvSource {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
        granularity: Granularity,
    ) -> Result<Vec<OhlcBar>, DataError> {
        let path = self.path_for(symbol, granularity);
        if !path.exists() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let bars = Self::read_file(&path)?;
        Ok(bars
            .into_iter()
            .filter(|b| {
                let day = b.timestamp.date();
                day >= start && day <= end
            })
            .collect())
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write(dir: &Path, name: &str, body: &str) {
        std::fs::write(dir.join(name), body).unwrap();
    }

    #[test]
    fn reads_sorts_and_filters_range() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "SPY_1d.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-04,3,4,2,3.5,300\n\
             2024-01-02,1,2,0.5,1.5,100\n\
             2024-01-03,2,3,1.5,2.5,200\n\
             2024-01-05,4,5,3,4.5,400\n",
        );
        let source = CsvSource::new(dir.path());
        let bars = source
            .fetch_bars("spy", date(2024, 1, 2), date(2024, 1, 4), Granularity::Day)
            .unwrap();
        assert_eq!(bars.len(), 3);
        assert_eq!(bars[0].close, 1.5);
        assert_eq!(bars[2].volume, 300);
        assert!(source.is_available());
    }

    #[test]
    fn duplicate_timestamps_keep_last_row() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "SPY_1h.csv",
            "timestamp,open,high,low,close,volume\n\
             2024-01-02 10:30:00,1,2,0.5,1.5,100\n\
             2024-01-02 10:30:00,1,2,0.5,1.8,100\n",
        );
        let bars = CsvSource::new(dir.path())
            .fetch_bars("SPY", date(2024, 1, 2), date(2024, 1, 2), Granularity::Hour1)
            .unwrap();
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 1.8);
    }

    #[test]
    fn missing_file_is_symbol_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = CsvSource::new(dir.path())
            .fetch_bars("NOPE", date(2024, 1, 1), date(2024, 1, 2), Granularity::Day)
            .unwrap_err();
        assert_eq!(err, DataError::SymbolNotFound { symbol: "NOPE".into() });
    }

    #[test]
    fn bad_timestamp_is_a_csv_error() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "SPY_1d.csv",
            "timestamp,open,high,low,close,volume\nyesterday,1,2,0.5,1.5,100\n",
        );
        let err = CsvSource::new(dir.path())
            .fetch_bars("SPY", date(2024, 1, 1), date(2024, 1, 2), Granularity::Day)
            .unwrap_err();
        assert!(matches!(err, DataError::Csv(_)));
    }
}
