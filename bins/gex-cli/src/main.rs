//! GEX Collector CLI
//!
//! Commands:
//! - `run`: Collect on a fixed interval until Ctrl+C
//! - `collect`: Run a single collection cycle and print its report
//! - `expiries`: List expiration dates for a symbol
//! - `gex`: GEX profile for one expiry, the nearest expiry, or all expiries
//! - `scan`: Period-over-period GEX changes across the allow-list
//!
//! # Usage
//! ```bash
//! # Scheduler (requires TRADIER_API_KEY)
//! TRADIER_API_KEY=... gex_collector run --interval 30 --workers 5
//!
//! # One cycle over a few symbols
//! gex_collector --symbols SPY,QQQ collect
//!
//! # Profiles
//! gex_collector gex --symbol SPY
//! gex_collector gex --symbol SPY --expiry 2025-01-17
//! gex_collector gex --symbol SPY --all
//!
//! # Scanner
//! gex_collector scan --sort zscore_abs_desc
//! ```

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use gex_engine::config::normalize_symbols;
use gex_engine::store::{Clock, SnapshotStore};
use gex_engine::{
    CollectionEngine, EngineConfig, GexQuery, GexScanner, ScanSort, SqliteStore, SystemClock,
    API_KEY_ENV,
};

#[derive(Parser)]
#[command(name = "gex_collector")]
#[command(about = "Options-chain GEX collector")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// SQLite database path
    #[arg(long, default_value = "data/gex.db", global = true)]
    db: PathBuf,

    /// Comma-separated symbol allow-list (default: built-in large-cap list)
    #[arg(long, value_delimiter = ',', global = true)]
    symbols: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Collect on a fixed interval until Ctrl+C
    Run {
        /// Minutes between cycles
        #[arg(long, default_value = "30")]
        interval: u64,

        /// Concurrent workers per cycle
        #[arg(long, default_value = "5")]
        workers: usize,
    },

    /// Run one collection cycle and print the report as JSON
    Collect {
        /// Concurrent workers
        #[arg(long, default_value = "5")]
        workers: usize,
    },

    /// List expiration dates for a symbol
    Expiries {
        #[arg(long)]
        symbol: String,
    },

    /// GEX profile as JSON
    Gex {
        #[arg(long)]
        symbol: String,

        /// Expiry (YYYY-MM-DD); defaults to the nearest one
        #[arg(long, conflicts_with = "all")]
        expiry: Option<NaiveDate>,

        /// Sum over every listed expiry
        #[arg(long, default_value = "false")]
        all: bool,
    },

    /// Period-over-period GEX changes
    Scan {
        /// Sort order (gex_asc, gex_desc, zscore_abs_desc)
        #[arg(long)]
        sort: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));

    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();

    let mut config = EngineConfig::from_env();
    if !cli.symbols.is_empty() {
        config.symbols = normalize_symbols(&cli.symbols);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store: Arc<dyn SnapshotStore> = Arc::new(
        SqliteStore::open(&cli.db, clock.clone())
            .with_context(|| format!("Failed to open database {}", cli.db.display()))?,
    );

    match cli.command {
        Commands::Run { interval, workers } => {
            config.collection_interval = Duration::from_secs(interval.max(1) * 60);
            config.worker_count = workers;
            run_scheduler(config, store, clock).await
        }
        Commands::Collect { workers } => {
            config.worker_count = workers;
            run_collect(config, store, clock).await
        }
        Commands::Expiries { symbol } => run_expiries(config, store, clock, &symbol).await,
        Commands::Gex { symbol, expiry, all } => run_gex(config, store, clock, &symbol, expiry, all).await,
        Commands::Scan { sort } => run_scan(config, store, clock, sort),
    }
}

fn warn_if_no_api_key(config: &EngineConfig) {
    if config.api_key.is_none() {
        warn!("{} is not set; only stored data is available", API_KEY_ENV);
    }
}

async fn run_scheduler(config: EngineConfig, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Result<()> {
    info!("=== GEX Collector ===");
    info!("API base: {}", config.api_base_url);
    info!("Symbols: {}", config.symbols.len());
    info!("Interval: {:?}", config.collection_interval);
    info!("Workers: {}", config.worker_count);
    info!("Press Ctrl+C to stop");
    warn_if_no_api_key(&config);

    let engine = CollectionEngine::new(config, store, clock);
    let handle = engine.spawn();

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, finishing current cycle...");
    handle.stop().await;

    Ok(())
}

async fn run_collect(config: EngineConfig, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Result<()> {
    warn_if_no_api_key(&config);
    let engine = CollectionEngine::new(config, store, clock);
    let report = engine.run_cycle().await;

    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.skipped.is_none() && report.dispatched > 0 && report.succeeded() == 0 {
        anyhow::bail!("Collection cycle failed for every symbol");
    }
    Ok(())
}

async fn run_expiries(
    config: EngineConfig,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    symbol: &str,
) -> Result<()> {
    warn_if_no_api_key(&config);
    let query = GexQuery::new(&config, store, clock);
    let dates = query.expiry_dates(symbol).await?;

    if dates.is_empty() {
        warn!("No expiration dates for {}", symbol);
    }
    for date in dates {
        println!("{}", date);
    }
    Ok(())
}

async fn run_gex(
    config: EngineConfig,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    symbol: &str,
    expiry: Option<NaiveDate>,
    all: bool,
) -> Result<()> {
    warn_if_no_api_key(&config);
    let query = GexQuery::new(&config, store, clock);

    let json = if all {
        let gex = query.calculate_gex_for_all_expiries(symbol).await?;
        info!("{} expiries, total GEX {:.0}, flip {:?}", gex.expiries.len(), gex.total_gex, gex.flip_level);
        serde_json::to_string_pretty(&gex)?
    } else {
        let profile = match expiry {
            Some(expiry) => query.gex_profile(symbol, expiry).await?,
            None => query.nearest_gex_profile(symbol).await?,
        };
        let Some(profile) = profile else {
            anyhow::bail!("No option chain available for {}", symbol);
        };
        info!(
            "{} {}: spot {:.2}, total GEX {:.0}, flip {:?}",
            profile.symbol, profile.expiry, profile.spot_price, profile.total_gex, profile.flip_level
        );
        serde_json::to_string_pretty(&profile)?
    };

    println!("{}", json);
    Ok(())
}

fn run_scan(
    config: EngineConfig,
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    sort: Option<String>,
) -> Result<()> {
    let sort = sort.map(|s| s.parse::<ScanSort>().unwrap_or_default()).unwrap_or_default();
    let scanner = GexScanner::new(&config, store, clock);
    let items = scanner.scan(sort)?;

    info!("{} symbols with GEX changes", items.len());
    println!("{}", serde_json::to_string_pretty(&items)?);
    Ok(())
}
