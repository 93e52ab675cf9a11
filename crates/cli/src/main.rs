//! Operator CLI for Tally.
//!
//! Every command prints JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tally_core::config::AppConfig;
use tally_core::{Clock, DEFAULT_HISTORY_LIMIT, DEFAULT_LIST_LIMIT, SystemClock};
use tally_engine::{EngineError, ScanValidator};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Scan validation and duplicate suppression for tracked codes")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "TALLY_CONFIG", default_value = "config/tally.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register codes as one batch (from arguments and/or a file, one code per line)
    Ingest {
        codes: Vec<String>,
        /// Read additional codes from this file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Batch identifier recorded with every ingestion (default: random UUID)
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// Register a single code
    Add {
        code: String,
        #[arg(long)]
        batch_id: Option<String>,
    },
    /// Delete a single code from the registry
    Remove { code: String },
    /// Validate one scan
    Scan { code: String },
    /// Validate scans read from stdin, one code per line
    Watch,
    /// Existence cache commands
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
    /// Registry statistics
    Stats,
    /// Recent scan events, or the ingestion history of one code
    History {
        /// Show ingestion records of this code instead of scan events
        #[arg(long)]
        code: Option<String>,
        #[arg(long, default_value_t = DEFAULT_HISTORY_LIMIT)]
        limit: u32,
    },
    /// Look up codes
    Search {
        #[arg(required = true)]
        codes: Vec<String>,
    },
    /// List registry entries, newest first
    List {
        #[arg(long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: u32,
        /// Only entries first seen at or after this RFC 3339 time
        #[arg(long, value_parser = parse_timestamp)]
        since: Option<OffsetDateTime>,
        /// Only entries first seen at or before this RFC 3339 time
        #[arg(long, value_parser = parse_timestamp)]
        until: Option<OffsetDateTime>,
    },
    /// Delete every code, ingestion record and scan event
    Clear {
        /// Confirm the wipe
        #[arg(long)]
        yes: bool,
    },
    /// Print engine metrics in Prometheus text format
    Metrics,
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache size and freshness
    Status,
    /// Rebuild the cache from the registry
    Reload,
}

/// One line of `watch` output when a scan could not be classified.
#[derive(Serialize)]
struct ScanFailure<'a> {
    code: &'a str,
    error: &'static str,
    message: String,
}

fn parse_timestamp(raw: &str) -> Result<OffsetDateTime, String> {
    OffsetDateTime::parse(raw, &Rfc3339).map_err(|e| format!("expected an RFC 3339 timestamp: {e}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("failed to encode output")?
    );
    Ok(())
}

/// Load configuration: optional TOML file, overridden by `TALLY_` environment variables.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();
    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!(config_path = %path.display(), "No config file found, using defaults");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("TALLY_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    Ok(config)
}

async fn build_validator(config: &AppConfig) -> Result<ScanValidator> {
    let store = tally_registry::from_config(&config.registry)
        .await
        .context("failed to initialize registry store")?;
    store
        .health_check()
        .await
        .context("registry health check failed")?;

    let offset = config.engine.utc_offset()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new(offset));
    ScanValidator::new(store, clock, &config.engine).context("failed to build scan validator")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();

    if let Commands::Metrics = command {
        print!("{}", tally_engine::gather_metrics());
        return Ok(());
    }

    let config = load_config(&config)?;
    let validator = build_validator(&config).await?;

    match command {
        Commands::Ingest {
            codes,
            file,
            batch_id,
        } => handle_ingest(&validator, codes, file.as_deref(), batch_id).await,
        Commands::Add { code, batch_id } => {
            let batch_id = batch_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let row = validator
                .add_code(&code, &batch_id, validator.now())
                .await?;
            print_json(&row)
        }
        Commands::Remove { code } => {
            validator.remove_code(&code).await?;
            print_json(&serde_json::json!({ "removed": code.trim() }))
        }
        Commands::Scan { code } => print_json(&validator.scan(&code).await?),
        Commands::Watch => handle_watch(&validator).await,
        Commands::Cache { command } => match command {
            CacheCommands::Status => print_json(&validator.cache_status().await),
            CacheCommands::Reload => {
                let loaded = validator.force_cache_reload().await?;
                print_json(&serde_json::json!({ "loaded": loaded }))
            }
        },
        Commands::Stats => print_json(&validator.stats().await?),
        Commands::History { code, limit } => match code {
            Some(code) => print_json(&validator.ingestion_history(&code).await?),
            None => print_json(&validator.recent_events(limit).await?),
        },
        Commands::Search { codes } => print_json(&validator.search_codes(&codes).await?),
        Commands::List {
            limit,
            since,
            until,
        } => {
            if since.is_some() || until.is_some() {
                print_json(&validator.list_entries_between(since, until).await?)
            } else {
                print_json(&validator.list_entries(limit).await?)
            }
        }
        Commands::Clear { yes } => {
            if !yes {
                anyhow::bail!("refusing to clear the registry without --yes");
            }
            print_json(&validator.clear_all().await?)
        }
        Commands::Metrics => Ok(()),
    }
}

async fn handle_ingest(
    validator: &ScanValidator,
    mut codes: Vec<String>,
    file: Option<&Path>,
    batch_id: Option<String>,
) -> Result<()> {
    if let Some(path) = file {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read codes from {}", path.display()))?;
        codes.extend(contents.lines().map(str::to_string));
    }

    let batch_id = batch_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let report = validator
        .ingest_codes(&codes, &batch_id, validator.now())
        .await?;
    print_json(&report)
}

/// Classify codes as a keyboard-wedge scanner types them, one per line.
///
/// Store failures are reported per line and do not stop the loop.
async fn handle_watch(validator: &ScanValidator) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let code = line.trim();
        if code.is_empty() {
            continue;
        }

        let output = match validator.scan(code).await {
            Ok(outcome) => serde_json::to_string(&outcome)?,
            Err(err @ EngineError::InvariantViolation(_)) => return Err(err.into()),
            Err(err) => serde_json::to_string(&ScanFailure {
                code,
                error: err.code(),
                message: err.to_string(),
            })?,
        };
        println!("{output}");
    }

    Ok(())
}
