//! QuoteCache CLI: bars, quotes, analysis, preload and cache administration.
//!
//! Commands:
//! - `bars`: serve a bar series through the cache
//! - `quote`: latest quotes for several symbols, cached briefly in L1 and L2
//! - `analyze`: indicator analysis with signals and an overall verdict
//! - `preload`: warm the cache for many symbols under the rate budget
//! - `cache status`: hit ratios, occupancy, health and recommendations
//! - `cache clear`: invalidate everything or one symbol, per tier
//! - `cache prune`: drop expired entries from L1 and SQLite
//!
//! Every command prints one JSON response envelope on stdout; logs go to stderr.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand, ValueEnum};
use quotecache_core::analysis::{AnalysisRequest, IndicatorKind};
use quotecache_core::cache::TierSelection;
use quotecache_core::domain::{BarsQuery, Granularity, QuotesQuery};
use quotecache_core::preload::{PreloadRequest, StdoutProgress};
use quotecache_service::{
    init_logging, AnalysisQuery, DataOptimization, DataSourceTag, QuoteCacheConfig, QuoteService,
    ResponseEnvelope, Served, ServiceError, ANALYSIS_FIELDS, BAR_FIELDS, QUOTE_FIELDS,
};
use serde_json::Value;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "quotecache",
    about = "QuoteCache CLI: tiered market-data cache and indicator engine"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter (e.g. info, debug, quotecache_core=trace). Overrides the config.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct RangeArgs {
    /// Symbol (e.g., SPY).
    symbol: String,

    /// Bar granularity: 1m, 5m, 15m, 30m, 1h, 1d, 1w, 1mo.
    #[arg(long, short, default_value = "1d")]
    granularity: Granularity,

    /// Start date (YYYY-MM-DD). Defaults to `--days` before the end date.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Lookback in days when no start date is given.
    #[arg(long, default_value_t = 365)]
    days: u32,
}

impl RangeArgs {
    fn query(&self) -> BarsQuery {
        let end = self.end.unwrap_or_else(|| chrono::Local::now().date_naive());
        match self.start {
            Some(start) => BarsQuery::new(&self.symbol, self.granularity, start, end),
            None => BarsQuery::lookback(&self.symbol, self.granularity, end, self.days),
        }
    }
}

#[derive(Args)]
struct ProjectionArgs {
    /// Return only these fields (comma-separated). Overrides --essential.
    #[arg(long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Return only the essential fields.
    #[arg(long, default_value_t = false)]
    essential: bool,

    /// Keep placeholder values such as "" and "N/A".
    #[arg(long, default_value_t = false)]
    keep_placeholders: bool,

    /// Return the payload untouched.
    #[arg(long, default_value_t = false)]
    raw: bool,
}

impl ProjectionArgs {
    fn options(&self) -> DataOptimization {
        DataOptimization {
            enable_optimization: !self.raw,
            only_essential_fields: self.essential,
            custom_fields: self.fields.clone(),
            remove_meaningless_values: !self.keep_placeholders,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve a bar series through the cache.
    Bars {
        #[command(flatten)]
        range: RangeArgs,

        #[command(flatten)]
        projection: ProjectionArgs,
    },
    /// Latest quotes for one or more symbols.
    Quote {
        #[arg(required = true)]
        symbols: Vec<String>,

        #[command(flatten)]
        projection: ProjectionArgs,
    },
    /// Indicator analysis with per-indicator signals and an overall verdict.
    Analyze {
        #[command(flatten)]
        range: RangeArgs,

        /// Indicators (comma-separated): ma, ema, macd, adx, rsi, bollinger, kdj, atr, obv, vwap.
        /// Defaults to all.
        #[arg(long, short, value_delimiter = ',')]
        indicators: Vec<IndicatorKind>,

        #[command(flatten)]
        projection: ProjectionArgs,
    },
    /// Warm the cache for many (symbol, granularity) pairs.
    Preload {
        /// Symbols to preload. Defaults to `[preload] symbols` from the config.
        symbols: Vec<String>,

        /// Granularities (comma-separated). Defaults to the config.
        #[arg(long, short, value_delimiter = ',')]
        granularity: Vec<Granularity>,

        /// Lookback in days. Defaults to the config.
        #[arg(long)]
        days: Option<u32>,

        /// As-of date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        as_of: Option<NaiveDate>,
    },
    /// Cache administration commands.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TierArg {
    Memory,
    Distributed,
    Durable,
    All,
}

impl From<TierArg> for TierSelection {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Memory => TierSelection::Memory,
            TierArg::Distributed => TierSelection::Distributed,
            TierArg::Durable => TierSelection::Durable,
            TierArg::All => TierSelection::All,
        }
    }
}

#[derive(Subcommand)]
enum CacheAction {
    /// Report hit ratios, occupancy, tier reachability and health.
    Status,
    /// Invalidate cached entries.
    Clear {
        /// Only entries of this symbol.
        #[arg(long)]
        symbol: Option<String>,

        /// Tiers to clear.
        #[arg(long, value_enum, default_value = "all")]
        tier: TierArg,
    },
    /// Remove expired entries from L1 and the SQLite store.
    Prune,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => QuoteCacheConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => QuoteCacheConfig::default(),
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&config.log_level));

    let service = QuoteService::from_config(&config).context("starting quote service")?;
    let envelope = match cli.command {
        Commands::Bars { range, projection } => run_bars(&service, &range, &projection),
        Commands::Quote {
            symbols,
            projection,
        } => run_quote(&service, symbols, &projection),
        Commands::Analyze {
            range,
            indicators,
            projection,
        } => run_analyze(&service, &range, indicators, &projection),
        Commands::Preload {
            symbols,
            granularity,
            days,
            as_of,
        } => run_preload(&service, &config, symbols, granularity, days, as_of)?,
        Commands::Cache { action } => match action {
            CacheAction::Status => run_cache_status(&service)?,
            CacheAction::Clear { symbol, tier } => {
                run_cache_clear(&service, symbol.as_deref(), tier.into())?
            }
            CacheAction::Prune => run_cache_prune(&service)?,
        },
    };
    service.shutdown();

    println!(
        "{}",
        serde_json::to_string_pretty(&envelope).context("encoding response")?
    );
    if !envelope.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}

fn respond(
    message: &str,
    started: Instant,
    result: Result<Served<Value>, ServiceError>,
) -> ResponseEnvelope {
    match result {
        Ok(served) => ResponseEnvelope::from_served(message, served),
        Err(err) => ResponseEnvelope::error(&err, started.elapsed()),
    }
}

fn run_bars(
    service: &QuoteService,
    range: &RangeArgs,
    projection: &ProjectionArgs,
) -> ResponseEnvelope {
    let started = Instant::now();
    let query = range.query();
    debug!(?query, "bars");
    let result = service
        .bars(&query)
        .and_then(|served| served.project(&projection.options(), BAR_FIELDS));
    respond("bars served", started, result)
}

fn run_quote(
    service: &QuoteService,
    symbols: Vec<String>,
    projection: &ProjectionArgs,
) -> ResponseEnvelope {
    let started = Instant::now();
    let query = QuotesQuery::new(symbols);
    debug!(?query, "quote");
    let result = service
        .quotes(&query)
        .and_then(|served| served.project(&projection.options(), QUOTE_FIELDS));
    respond("quotes served", started, result)
}

fn run_analyze(
    service: &QuoteService,
    range: &RangeArgs,
    indicators: Vec<IndicatorKind>,
    projection: &ProjectionArgs,
) -> ResponseEnvelope {
    let started = Instant::now();
    let request = if indicators.is_empty() {
        AnalysisRequest::all()
    } else {
        AnalysisRequest::new(indicators)
    };
    let query = AnalysisQuery {
        bars: range.query(),
        request,
    };
    let result = service
        .analysis(&query)
        .and_then(|served| served.project(&projection.options(), ANALYSIS_FIELDS));
    respond("analysis served", started, result)
}

fn run_preload(
    service: &QuoteService,
    config: &QuoteCacheConfig,
    symbols: Vec<String>,
    granularities: Vec<Granularity>,
    days: Option<u32>,
    as_of: Option<NaiveDate>,
) -> Result<ResponseEnvelope> {
    let started = Instant::now();
    let symbols = if symbols.is_empty() {
        config.preload.symbols.clone()
    } else {
        symbols
    };
    if symbols.is_empty() {
        let err = ServiceError::InvalidRequest(
            "no symbols given and [preload] symbols is empty".into(),
        );
        return Ok(ResponseEnvelope::error(&err, started.elapsed()));
    }
    let request = PreloadRequest {
        symbols,
        lookback_days: days.unwrap_or(config.preload.lookback_days),
        granularities: if granularities.is_empty() {
            config.preload.granularities.clone()
        } else {
            granularities
        },
        as_of: as_of.unwrap_or_else(|| chrono::Local::now().date_naive()),
    };

    let report = service.preload(&request, &StdoutProgress);
    service.flush();
    let message = format!(
        "preload finished: {} loaded, {} skipped, {} failed",
        report.succeeded, report.skipped, report.failed
    );
    let data = serde_json::to_value(&report).context("encoding preload report")?;
    Ok(ResponseEnvelope::ok(
        message,
        data,
        false,
        DataSourceTag::Source,
        started.elapsed(),
    ))
}

fn run_cache_status(service: &QuoteService) -> Result<ResponseEnvelope> {
    let started = Instant::now();
    let status = service.cache_status();
    let message = format!("cache is {:?}", status.stats.health_status).to_lowercase();
    let data = serde_json::to_value(&status).context("encoding cache status")?;
    Ok(ResponseEnvelope::ok(
        message,
        data,
        false,
        DataSourceTag::Cache,
        started.elapsed(),
    ))
}

fn run_cache_clear(
    service: &QuoteService,
    symbol: Option<&str>,
    tiers: TierSelection,
) -> Result<ResponseEnvelope> {
    let started = Instant::now();
    let report = service.clear_cache(tiers, symbol);
    service.flush();
    let data = serde_json::to_value(&report).context("encoding clear report")?;
    Ok(ResponseEnvelope::ok(
        "cache cleared",
        data,
        false,
        DataSourceTag::Cache,
        started.elapsed(),
    ))
}

fn run_cache_prune(service: &QuoteService) -> Result<ResponseEnvelope> {
    let started = Instant::now();
    let memory_removed = service.prune_expired();
    service.flush();
    let status = service.cache_status();
    let data = serde_json::json!({
        "memory_removed": memory_removed,
        "durable_entries": status.durable_entries,
    });
    Ok(ResponseEnvelope::ok(
        "expired entries pruned",
        data,
        false,
        DataSourceTag::Cache,
        started.elapsed(),
    ))
}
