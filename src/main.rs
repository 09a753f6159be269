//! CLI entry point for the GTFS dataset pager.
//!
//! Provides subcommands for querying a dataset page by page, listing the
//! downloaded datasets, writing a preview snapshot and refreshing datasets
//! from their source URLs.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gtfs_pager::{
    config::AppConfig,
    fetch::BasicClient,
    output::{print_json, write_json_atomic},
    refresh::{RefreshSources, Refresher},
    service::DatasetService,
};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "gtfs_pager")]
#[command(about = "Paginated search over downloaded GTFS datasets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print one page of a dataset as JSON
    Query {
        /// Dataset name, with or without extension (e.g. "stops" or "stop_times.txt")
        dataset: String,

        /// Zero-based page number
        #[arg(short, long, default_value = "0")]
        page: String,

        /// Records per page (defaults to the dataset's configured default)
        #[arg(short, long)]
        limit: Option<String>,

        /// Case-insensitive substring to search for
        #[arg(short, long)]
        search: Option<String>,

        /// Restrict the search to this column
        #[arg(short, long)]
        field: Option<String>,

        /// Exact match filter, repeatable (e.g. --filter stop_id=8814001)
        #[arg(long = "filter", value_name = "COLUMN=VALUE", value_parser = parse_filter)]
        filters: Vec<(String, String)>,

        /// Column to sort by
        #[arg(long)]
        sort_by: Option<String>,

        /// "asc" or "desc"
        #[arg(long, default_value = "asc")]
        sort_direction: String,
    },
    /// List the dataset files in the data directory
    Files,
    /// Write the first records of every dataset to a JSON snapshot
    Preview {
        /// Snapshot path (defaults to <DATA_DIR>/cache/preview.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Download every configured source once
    Refresh {
        /// JSON file mapping dataset file names to URLs (overrides REFRESH_SOURCES)
        #[arg(short, long)]
        sources: Option<PathBuf>,
    },
    /// Keep downloading configured sources on an interval
    Watch {
        /// JSON file mapping dataset file names to URLs (overrides REFRESH_SOURCES)
        #[arg(short, long)]
        sources: Option<PathBuf>,

        /// Seconds between rounds (overrides REFRESH_INTERVAL_SECS)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of rounds to run (0 = until interrupted)
        #[arg(short = 'n', long, default_value_t = 0)]
        rounds: usize,
    },
}

fn parse_filter(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((column, value)) if !column.trim().is_empty() => {
            Ok((column.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected COLUMN=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/gtfs_pager.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("gtfs_pager.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Query {
            dataset,
            page,
            limit,
            search,
            field,
            filters,
            sort_by,
            sort_direction,
        } => {
            let service = DatasetService::from_config(&config)?;

            let mut params: Vec<(&str, &str)> = vec![("page", page.as_str())];
            if let Some(limit) = &limit {
                params.push(("limit", limit.as_str()));
            }
            if let Some(search) = &search {
                params.push(("search", search.as_str()));
            }
            if let Some(field) = &field {
                params.push(("field", field.as_str()));
            }
            if let Some(sort_by) = &sort_by {
                params.push(("sort_by", sort_by.as_str()));
                params.push(("sort_direction", sort_direction.as_str()));
            }

            let mut request = service.request_from_params(&dataset, params);
            for (column, value) in filters {
                request.spec = request.spec.filter(column, value);
            }

            match service.query(&dataset, request).await {
                Ok(page) => print_json(&*page)?,
                Err(e) => {
                    error!(
                        dataset = %dataset,
                        status = e.status_code(),
                        transient = e.is_transient(),
                        error = %e,
                        "Query failed"
                    );
                    return Err(e.into());
                }
            }
        }
        Commands::Files => {
            let service = DatasetService::from_config(&config)?;
            let files = service.catalog().list_files()?;
            info!(count = files.len(), data_dir = %config.data_dir.display(), "Datasets listed");
            print_json(&files)?;
        }
        Commands::Preview { output } => {
            let service = DatasetService::from_config(&config)?;
            let preview = service.preview().await?;
            let output =
                output.unwrap_or_else(|| config.data_dir.join("cache").join("preview.json"));
            write_json_atomic(&output, &preview)?;
            info!(
                datasets = preview.datasets.len(),
                output = %output.display(),
                "Preview written"
            );
        }
        Commands::Refresh { sources } => {
            let refresher = refresher(&config, sources)?;
            let report = refresher.run_once().await;
            if !report.is_success() {
                bail!("Failed to download: {}", report.failed.join(", "));
            }
        }
        Commands::Watch {
            sources,
            interval,
            rounds,
        } => {
            let refresher = refresher(&config, sources)?;
            let period = interval
                .map(|secs| std::time::Duration::from_secs(secs.max(1)))
                .unwrap_or_else(|| config.refresh_interval());
            let rounds = (rounds > 0).then_some(rounds);
            info!(interval_secs = period.as_secs(), ?rounds, "Watching sources");

            tokio::select! {
                _ = refresher.watch(period, rounds) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping refresh loop"),
            }
        }
    }

    Ok(())
}

/// Builds a downloader from `--sources` or the `REFRESH_SOURCES` file.
fn refresher(config: &AppConfig, sources: Option<PathBuf>) -> Result<Refresher<BasicClient>> {
    let path = sources
        .or_else(|| config.refresh_sources.clone())
        .context("No refresh sources: pass --sources or set REFRESH_SOURCES")?;
    let sources = RefreshSources::load(&path)?;
    if sources.is_empty() {
        bail!("No sources configured in {}", path.display());
    }
    info!(sources = sources.len(), data_dir = %config.data_dir.display(), "Refresh sources loaded");
    Ok(Refresher::new(BasicClient::new(), &config.data_dir, sources))
}
