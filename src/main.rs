//! CLI entry point for the vehicle feed sync tool.
//!
//! Provides subcommands for running sync cycles against the hosted store,
//! exporting a local snapshot, and inspecting or pruning store versions.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use vehicle_feed_sync::{
    config::PipelineConfig,
    fetch::{BasicClient, auth::ApiKey, fetch_with_retry},
    infra::{arcgis::ArcGisClient, memory::MemoryStore},
    output::{WriteMode, append_record, print_pretty, write_snapshot},
    parser::decode_vehicles,
    services::feature_store::FeatureStoreApi,
    stats::RunStats,
    sync::{prune, run_cycle_into},
    validate::Validator,
};

#[derive(Parser)]
#[command(name = "vehicle_feed_sync")]
#[command(about = "Mirror a GTFS-RT vehicle position feed into a hosted feature store", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Config file plus the overrides most often changed per deployment.
#[derive(Args)]
struct ConfigArgs {
    /// JSON config file; missing keys keep their defaults
    #[arg(short, long, env = "VEHICLE_SYNC_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "FEED_URL")]
    feed_url: Option<String>,

    /// Title of the store to keep current
    #[arg(long, env = "BASE_TITLE")]
    base_title: Option<String>,

    #[arg(long, env = "ARCGIS_PORTAL_URL")]
    portal_url: Option<String>,

    /// Store owner; looked up from the token when omitted
    #[arg(long, env = "ARCGIS_USERNAME")]
    username: Option<String>,

    #[arg(long)]
    batch_size: Option<usize>,
}

impl ConfigArgs {
    fn resolve(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(url) = &self.feed_url {
            config.feed_url = url.clone();
        }
        if let Some(title) = &self.base_title {
            config.base_title = title.clone();
        }
        if let Some(portal) = &self.portal_url {
            config.portal_url = portal.clone();
        }
        if let Some(user) = &self.username {
            config.username = Some(user.clone());
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size;
        }
        config.validate()?;
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the feed and replace the store contents
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// Run against an in-process store instead of the portal
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        /// CSV file to append one row per cycle to
        #[arg(long)]
        history: Option<String>,

        /// Seconds between cycles
        #[arg(short, long, default_value_t = 60)]
        every: u64,

        /// Number of cycles to run (0 = until interrupted)
        #[arg(short = 'n', long, default_value_t = 1)]
        runs: usize,
    },
    /// Fetch, decode and validate, then write the vehicles to a local CSV
    Snapshot {
        #[command(flatten)]
        config: ConfigArgs,

        /// Feed file or URL; defaults to the configured feed url
        #[arg(value_name = "FILE_OR_URL")]
        source: Option<String>,

        #[arg(short, long, default_value = "vehicles.csv")]
        output: PathBuf,

        /// Gzip compress the CSV
        #[arg(long, default_value_t = false)]
        gzip: bool,

        /// Replace the output file if it exists
        #[arg(long, default_value_t = false)]
        overwrite: bool,
    },
    /// List owned stores for the base title, newest first
    ListStores {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Delete timestamped store versions outside the retention window
    Prune {
        #[command(flatten)]
        config: ConfigArgs,

        /// Versions to keep; defaults to the configured keep_versions
        #[arg(short, long)]
        keep: Option<usize>,

        /// Item id to keep regardless of age
        #[arg(long)]
        keep_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/vehicle_feed_sync.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("vehicle_feed_sync.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_env("RUST_LOG").unwrap_or_else(|_| EnvFilter::new("info")));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(
            EnvFilter::try_from_env("RUST_LOG_JSON").unwrap_or_else(|_| EnvFilter::new("debug")),
        );

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            dry_run,
            history,
            every,
            runs,
        } => {
            let config = config.resolve()?;
            let http = BasicClient::new(&config.client_options())?;
            let every = Duration::from_secs(every);

            let code = if dry_run {
                info!("Dry run: publishing to an in-process store");
                let store = MemoryStore::new("dry-run");
                run_cycles(&config, &http, &store, history.as_deref(), every, runs).await
            } else {
                let store = connect_store(&config).await?;
                run_cycles(&config, &http, &store, history.as_deref(), every, runs).await
            };
            return Ok(code);
        }
        Commands::Snapshot {
            config,
            source,
            output,
            gzip,
            overwrite,
        } => {
            let config = config.resolve()?;
            let source = source.unwrap_or_else(|| config.feed_url.clone());

            let bytes = load_feed(&config, &source).await?;
            if bytes.is_empty() {
                warn!(source = %source, "No feed data; snapshot not written");
                return Ok(ExitCode::FAILURE);
            }
            let vehicles = decode_vehicles(&bytes).context("feed could not be decoded")?;
            let valid = Validator::from_config(&config).filter(vehicles);

            let mode = if overwrite {
                WriteMode::Overwrite
            } else {
                WriteMode::CreateNew
            };
            write_snapshot(&output, &valid, mode, gzip)?;
        }
        Commands::ListStores { config } => {
            let config = config.resolve()?;
            let store = connect_store(&config).await?;
            list_stores(&config, &store).await?;
        }
        Commands::Prune {
            config,
            keep,
            keep_id,
        } => {
            let config = config.resolve()?;
            let store = connect_store(&config).await?;
            let keep = keep.unwrap_or(config.keep_versions);

            let report = prune(&store, &config.base_title, keep_id.as_deref(), keep).await?;
            if !report.failed.is_empty() {
                warn!(failed = ?report.failed, "Some versions could not be deleted");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

/// Builds the portal client from `ARCGIS_TOKEN` and the configured portal.
async fn connect_store(config: &PipelineConfig) -> Result<ArcGisClient<ApiKey<BasicClient>>> {
    let token = std::env::var("ARCGIS_TOKEN").context("ARCGIS_TOKEN must be set")?;
    let http = ApiKey::esri_bearer(BasicClient::new(&config.client_options())?, &token)?;
    ArcGisClient::connect(http, &config.portal_url, config.username.as_deref()).await
}

/// Whether `source` is an `http(s)` URL rather than a local path.
fn is_remote(source: &str) -> bool {
    reqwest::Url::parse(source).is_ok_and(|u| matches!(u.scheme(), "http" | "https"))
}

/// Loads feed data from a local file path or fetches it over HTTP.
#[tracing::instrument(skip(config), fields(source = %source))]
async fn load_feed(config: &PipelineConfig, source: &str) -> Result<Vec<u8>> {
    let bytes = if is_remote(source) {
        let client = BasicClient::new(&config.client_options())?;
        fetch_with_retry(&client, source, &config.retry_policy())
            .await
            .to_vec()
    } else {
        std::fs::read(source).with_context(|| format!("reading feed file '{source}'"))?
    };
    Ok(bytes)
}

/// Runs `runs` sync cycles (0 = until Ctrl+C), `every` apart.
///
/// A failed cycle is logged once and recorded in the history; later cycles
/// still run. The exit code reflects the last cycle.
async fn run_cycles<S: FeatureStoreApi + ?Sized>(
    config: &PipelineConfig,
    http: &BasicClient,
    store: &S,
    history: Option<&str>,
    every: Duration,
    runs: usize,
) -> ExitCode {
    if runs == 0 {
        info!(every_secs = every.as_secs(), "Syncing until interrupted. Press Ctrl+C to stop.");
    }

    let mut cycle = 0;
    let mut last_failed = false;
    loop {
        cycle += 1;
        info!(cycle, total = if runs == 0 { None } else { Some(runs) }, "Starting sync cycle");

        let mut stats = RunStats::started();
        match run_cycle_into(config, http, store, &mut stats).await {
            Ok(()) => last_failed = false,
            Err(e) => {
                last_failed = true;
                error!(error_type = e.kind(), error = %e, "Sync cycle failed");
                stats.record_error(e.kind(), &e.to_string());
            }
        }
        print_pretty(&stats);

        if let Some(path) = history {
            if let Err(e) = append_record(path, &stats) {
                warn!(path, error = %e, "Failed to append run history");
            }
        }

        if runs != 0 && cycle >= runs {
            break;
        }

        info!(every_secs = every.as_secs(), "Waiting before next cycle");
        tokio::select! {
            _ = tokio::time::sleep(every) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; stopping after {cycle} cycles");
                break;
            }
        }
    }

    if last_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Logs every owned version of the base title and what a prune would do.
async fn list_stores<S: FeatureStoreApi + ?Sized>(config: &PipelineConfig, store: &S) -> Result<()> {
    let base = config.base_title.as_str();
    let prefix = format!("{base}_");
    let mut items: Vec<_> = store
        .search_owned(base, &[])
        .await?
        .into_iter()
        .filter(|s| s.title == base || s.title.starts_with(&prefix))
        .collect();
    items.sort_by(|a, b| b.modified.cmp(&a.modified));

    for item in &items {
        info!(
            store_id = %item.id,
            title = %item.title,
            kind = item.kind.type_name(),
            modified = %item.modified,
            protected = item.protected,
            "Store"
        );
    }

    let versions = items.iter().filter(|s| s.title != base).count();
    let protected = items.iter().filter(|s| s.protected).count();
    info!(
        total = items.len(),
        base_present = items.iter().any(|s| s.title == base),
        versions,
        protected,
        beyond_retention = versions.saturating_sub(config.keep_versions),
        "Store list summary"
    );
    Ok(())
}
