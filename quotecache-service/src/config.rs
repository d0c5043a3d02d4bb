//! Service configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration. Durations are whole seconds or milliseconds as the field
//! name says. Rate-limit figures live here, never in code.
//!
//! ```toml
//! log_level = "info"
//!
//! [memory]
//! capacity = 5000
//!
//! [durable]
//! enabled = true
//! path = "cache/quotecache.db"
//!
//! [preload]
//! requests_per_window = 10
//! window_secs = 30
//!
//! [source]
//! kind = "csv"
//! csv_dir = "data"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use quotecache_core::cache::{MemoryTierConfig, RemoteTierConfig, StatsConfig, TieredCacheConfig};
use quotecache_core::domain::Granularity;
use quotecache_core::preload::PreloadConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn millis(n: u64) -> Duration {
    Duration::from_millis(n)
}

// ── L1 ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemorySection {
    pub capacity: usize,
    pub shards: usize,
    pub max_ttl_secs: Option<u64>,
    /// Background sweep interval; 0 disables the sweeper.
    pub sweep_interval_secs: u64,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            capacity: 1000,
            shards: 16,
            max_ttl_secs: None,
            sweep_interval_secs: 30,
        }
    }
}

// ── L2 / L3 ──

fn remote_tier(
    timeout_ms: u64,
    max_ttl_secs: Option<u64>,
    write_retries: u32,
    retry_backoff_ms: u64,
    probe_interval_secs: u64,
) -> RemoteTierConfig {
    RemoteTierConfig {
        timeout: millis(timeout_ms),
        max_ttl: max_ttl_secs.map(secs),
        write_retries,
        retry_backoff: millis(retry_backoff_ms),
        probe_interval: secs(probe_interval_secs),
    }
}

/// L2. There is no network client in this workspace; when enabled the tier
/// is backed by the in-process key-value store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedSection {
    pub enabled: bool,
    pub timeout_ms: u64,
    pub max_ttl_secs: Option<u64>,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    pub probe_interval_secs: u64,
}

impl Default for DistributedSection {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_ms: 250,
            max_ttl_secs: Some(3600),
            write_retries: 2,
            retry_backoff_ms: 50,
            probe_interval_secs: 15,
        }
    }
}

impl DistributedSection {
    pub fn tier_config(&self) -> RemoteTierConfig {
        remote_tier(
            self.timeout_ms,
            self.max_ttl_secs,
            self.write_retries,
            self.retry_backoff_ms,
            self.probe_interval_secs,
        )
    }
}

/// L3: the SQLite file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableSection {
    pub enabled: bool,
    pub path: PathBuf,
    pub timeout_ms: u64,
    pub max_ttl_secs: Option<u64>,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    pub probe_interval_secs: u64,
}

impl Default for DurableSection {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("cache/quotecache.db"),
            timeout_ms: 500,
            max_ttl_secs: None,
            write_retries: 2,
            retry_backoff_ms: 50,
            probe_interval_secs: 15,
        }
    }
}

impl DurableSection {
    pub fn tier_config(&self) -> RemoteTierConfig {
        remote_tier(
            self.timeout_ms,
            self.max_ttl_secs,
            self.write_retries,
            self.retry_backoff_ms,
            self.probe_interval_secs,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsSection {
    pub grace_period_secs: u64,
    pub degraded_occupancy: f64,
    pub min_sample: u64,
    pub low_hit_ratio: f64,
}

impl Default for StatsSection {
    fn default() -> Self {
        let d = StatsConfig::default();
        Self {
            grace_period_secs: d.grace_period.as_secs(),
            degraded_occupancy: d.degraded_occupancy,
            min_sample: d.min_sample,
            low_hit_ratio: d.low_hit_ratio,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreloadSection {
    pub workers: usize,
    pub requests_per_window: u32,
    pub window_secs: u64,
    pub lookback_days: u32,
    /// Default symbols for `preload` when none are given on the command line.
    pub symbols: Vec<String>,
    pub granularities: Vec<Granularity>,
}

impl Default for PreloadSection {
    fn default() -> Self {
        Self {
            workers: 4,
            requests_per_window: 10,
            window_secs: 30,
            lookback_days: 365,
            symbols: Vec::new(),
            granularities: vec![Granularity::Day],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlSection {
    pub bars_secs: u64,
    pub analysis_secs: u64,
    /// Quotes are kept in L1 and L2 only.
    pub quote_secs: u64,
}

impl Default for TtlSection {
    fn default() -> Self {
        Self {
            bars_secs: 3600,
            analysis_secs: 900,
            quote_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Synthetic,
    Csv,
    Yahoo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub kind: SourceKind,
    /// Required when `kind = "csv"`.
    pub csv_dir: Option<PathBuf>,
    pub fetch_timeout_ms: u64,
    pub fetch_threads: usize,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            kind: SourceKind::Synthetic,
            csv_dir: None,
            fetch_timeout_ms: 10_000,
            fetch_threads: 4,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 3,
        }
    }
}

/// Complete service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteCacheConfig {
    pub log_level: String,
    pub memory: MemorySection,
    pub distributed: DistributedSection,
    pub durable: DurableSection,
    pub stats: StatsSection,
    pub preload: PreloadSection,
    pub ttl: TtlSection,
    pub source: SourceSection,
}

impl Default for QuoteCacheConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            memory: MemorySection::default(),
            distributed: DistributedSection::default(),
            durable: DurableSection::default(),
            stats: StatsSection::default(),
            preload: PreloadSection::default(),
            ttl: TtlSection::default(),
            source: SourceSection::default(),
        }
    }
}

impl QuoteCacheConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.memory.capacity == 0 {
            return Err(invalid("memory.capacity", "must be at least 1"));
        }
        if self.memory.shards == 0 {
            return Err(invalid("memory.shards", "must be at least 1"));
        }
        if !(self.stats.degraded_occupancy > 0.0 && self.stats.degraded_occupancy <= 1.0) {
            return Err(invalid("stats.degraded_occupancy", "must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.stats.low_hit_ratio) {
            return Err(invalid("stats.low_hit_ratio", "must be in [0, 1]"));
        }
        if self.distributed.timeout_ms == 0 {
            return Err(invalid("distributed.timeout_ms", "must be greater than zero"));
        }
        if self.durable.timeout_ms == 0 {
            return Err(invalid("durable.timeout_ms", "must be greater than zero"));
        }
        if self.preload.requests_per_window == 0 {
            return Err(invalid("preload.requests_per_window", "must be at least 1"));
        }
        if self.preload.window_secs == 0 {
            return Err(invalid("preload.window_secs", "must be greater than zero"));
        }
        if self.ttl.bars_secs == 0 {
            return Err(invalid("ttl.bars_secs", "must be greater than zero"));
        }
        if self.ttl.analysis_secs == 0 {
            return Err(invalid("ttl.analysis_secs", "must be greater than zero"));
        }
        if self.ttl.quote_secs == 0 {
            return Err(invalid("ttl.quote_secs", "must be greater than zero"));
        }
        if self.source.fetch_timeout_ms == 0 {
            return Err(invalid("source.fetch_timeout_ms", "must be greater than zero"));
        }
        if self.source.kind == SourceKind::Csv && self.source.csv_dir.is_none() {
            return Err(invalid("source.csv_dir", "required when source.kind = \"csv\""));
        }
        Ok(())
    }

    pub fn cache_config(&self) -> TieredCacheConfig {
        TieredCacheConfig {
            memory: MemoryTierConfig {
                capacity: self.memory.capacity,
                shards: self.memory.shards,
                max_ttl: self.memory.max_ttl_secs.map(secs),
            },
            distributed: self.distributed.tier_config(),
            durable: self.durable.tier_config(),
            stats: StatsConfig {
                grace_period: secs(self.stats.grace_period_secs),
                degraded_occupancy: self.stats.degraded_occupancy,
                min_sample: self.stats.min_sample,
                low_hit_ratio: self.stats.low_hit_ratio,
            },
            sweep_interval: (self.memory.sweep_interval_secs > 0)
                .then(|| secs(self.memory.sweep_interval_secs)),
            ..TieredCacheConfig::default()
        }
    }

    pub fn preload_config(&self) -> PreloadConfig {
        PreloadConfig {
            workers: self.preload.workers,
            requests_per_window: self.preload.requests_per_window,
            window: secs(self.preload.window_secs),
            fetch_timeout: self.fetch_timeout(),
            ttl: self.bars_ttl(),
        }
    }

    pub fn bars_ttl(&self) -> Duration {
        secs(self.ttl.bars_secs)
    }

    pub fn analysis_ttl(&self) -> Duration {
        secs(self.ttl.analysis_secs)
    }

    pub fn quote_ttl(&self) -> Duration {
        secs(self.ttl.quote_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        millis(self.source.fetch_timeout_ms)
    }
}
