//! wharf - web archive harvesting tool

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};
use wharf_common::logging::{init_logging, LogConfig, LogLevel};
use wharf_harvest::catalog::{self, Task};
use wharf_harvest::config::{HarvestConfig, HarvestPaths, SegmentPolicy};
use wharf_harvest::merge;
use wharf_harvest::pool::HarvestContext;
use wharf_harvest::runner::run_harvest;

#[derive(Parser, Debug)]
#[command(name = "wharf")]
#[command(author, version, about = "Web archive index harvester")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args, Debug)]
struct CommonOpts {
    /// Working directory holding the catalog, ledger and output
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Base URL of the index query service
    #[arg(long, default_value = "https://index.commoncrawl.org")]
    index_url: String,

    /// Base URL of the raw storage service
    #[arg(long, default_value = "https://data.commoncrawl.org")]
    data_url: String,

    /// Maximum in-flight fetches
    #[arg(long, default_value_t = 16)]
    concurrency: usize,

    /// Attempt budget per task, including the first attempt
    #[arg(long, default_value_t = 5)]
    max_attempts: u32,

    /// Bounded wait per network attempt, in seconds
    #[arg(long, default_value_t = 120)]
    timeout_secs: u64,
}

impl CommonOpts {
    fn config(&self, site_filter: &str) -> HarvestConfig {
        HarvestConfig {
            index_url: self.index_url.clone(),
            data_url: self.data_url.clone(),
            site_filter: site_filter.to_string(),
            concurrency: self.concurrency,
            max_attempts: self.max_attempts,
            request_timeout: Duration::from_secs(self.timeout_secs),
            ..HarvestConfig::default()
        }
    }

    fn paths(&self) -> HarvestPaths {
        HarvestPaths::new(&self.data_dir)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve segments to page counts and build the task catalog
    Enumerate {
        #[command(flatten)]
        common: CommonOpts,

        /// Target-site filter passed to index queries (e.g. "example.com/*")
        #[arg(long)]
        site: String,

        /// File listing one segment id per line
        #[arg(long)]
        segments_file: PathBuf,
    },

    /// Fetch all catalogued index pages
    FetchIndex {
        #[command(flatten)]
        common: CommonOpts,

        /// Whether one failed page fails its whole segment
        #[arg(long, default_value_t = SegmentPolicy::Partial)]
        segment_policy: SegmentPolicy,
    },

    /// Collapse fetched index records to one best record per page
    Merge {
        #[command(flatten)]
        common: CommonOpts,

        /// Output file (defaults to <data-dir>/merged.jsonl)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Fetch raw capture bytes for the merged records
    FetchPayloads {
        #[command(flatten)]
        common: CommonOpts,

        /// Merged index to read (defaults to <data-dir>/merged.jsonl)
        #[arg(long)]
        input: Option<PathBuf>,

        /// Pause between successful payload fetches, in milliseconds
        #[arg(long, default_value_t = 100)]
        polite_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbose flag
    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("wharf".to_string())
        .build();

    // Merge with environment variables (they take precedence)
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    match cli.command {
        Command::Enumerate {
            common,
            site,
            segments_file,
        } => {
            let segments = read_segments(&segments_file)?;
            info!(segments = segments.len(), site = %site, "enumerating index tasks");

            let ctx = HarvestContext::new(common.config(&site))?;
            let summary = catalog::enumerate_index_tasks(
                &ctx.client,
                &segments,
                &common.paths().catalog_file(),
            )
            .await?;
            info!(
                generated = summary.generated,
                skipped_segments = summary.skipped,
                "enumeration complete"
            );
        },

        Command::FetchIndex {
            common,
            segment_policy,
        } => {
            let paths = common.paths();
            let mut config = common.config("");
            config.segment_policy = segment_policy;

            let tasks: Vec<Task> = catalog::load_tasks(&paths.catalog_file())?
                .into_iter()
                .filter(|task| matches!(task, Task::IndexPage { .. }))
                .collect();
            if tasks.is_empty() {
                anyhow::bail!(
                    "no index tasks in {}; run 'wharf enumerate' first",
                    paths.catalog_file().display()
                );
            }

            let summary = run_with_stop_signal(config, &paths, tasks).await?;
            info!(%summary, "index fetch complete");
            if summary.failed > 0 || summary.aborted > 0 {
                warn!(
                    failures = %paths.failures_file().display(),
                    "some tasks failed; re-run to retry or inspect the failure log"
                );
            }
        },

        Command::Merge { common, output } => {
            let paths = common.paths();
            let merged = merge::merge_containers(&paths.containers_dir())?;
            let output = output.unwrap_or_else(|| paths.merged_file());
            let written = merge::write_merged(&merged, &output)?;
            info!(records = written, output = %output.display(), "merge complete");
        },

        Command::FetchPayloads {
            common,
            input,
            polite_delay_ms,
        } => {
            let paths = common.paths();
            let mut config = common.config("");
            config.polite_delay = match polite_delay_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            };

            let input = input.unwrap_or_else(|| paths.merged_file());
            let tasks = catalog::range_tasks_from_index(&input)
                .with_context(|| format!("failed to read merged index {}", input.display()))?;
            if tasks.is_empty() {
                anyhow::bail!(
                    "no downloadable records in {}; run 'wharf merge' first",
                    input.display()
                );
            }

            let summary = run_with_stop_signal(config, &paths, tasks).await?;
            info!(%summary, "payload fetch complete");
            if summary.failed > 0 {
                warn!(
                    failures = %paths.failures_file().display(),
                    "some payloads failed; re-run to retry"
                );
            }
        },
    }

    Ok(())
}

/// Run the pool with Ctrl-C wired to the cooperative stop signal.
async fn run_with_stop_signal(
    config: HarvestConfig,
    paths: &HarvestPaths,
    tasks: Vec<Task>,
) -> Result<wharf_harvest::RunSummary> {
    let ctx = Arc::new(HarvestContext::new(config)?);
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("stop requested; letting in-flight fetches finish");
            let _ = stop_tx.send(true);
        }
    });

    Ok(run_harvest(ctx, paths, tasks, stop_rx).await?)
}

/// Read segment ids, one per line; blank lines and '#' comments are skipped.
fn read_segments(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read segments file {}", path.display()))?;
    let segments: Vec<String> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect();
    if segments.is_empty() {
        anyhow::bail!("segments file {} lists no segments", path.display());
    }
    Ok(segments)
}
