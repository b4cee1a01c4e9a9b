//! Harvest configuration
//!
//! All tunables travel in an explicit [`HarvestConfig`] handed to the
//! components that need them; there is no ambient global state. On-disk
//! layout is centralized in [`HarvestPaths`] so every component agrees on
//! where the catalog, ledger and output live.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RetryPolicy;

/// How a segment whose index pages partially fail is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SegmentPolicy {
    /// First unrecoverable page failure cancels the segment's remaining
    /// pages and reports the whole segment failed.
    FailFast,
    /// Keep fetching the segment's other pages and report only the pages
    /// that failed.
    #[default]
    Partial,
}

impl std::str::FromStr for SegmentPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fail-fast" | "failfast" => Ok(SegmentPolicy::FailFast),
            "partial" => Ok(SegmentPolicy::Partial),
            other => Err(format!(
                "invalid segment policy '{other}' (expected 'fail-fast' or 'partial')"
            )),
        }
    }
}

impl std::fmt::Display for SegmentPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentPolicy::FailFast => write!(f, "fail-fast"),
            SegmentPolicy::Partial => write!(f, "partial"),
        }
    }
}

/// Tunables for one harvest run.
#[derive(Debug, Clone)]
pub struct HarvestConfig {
    /// Base URL of the index query service.
    pub index_url: String,

    /// Base URL of the raw storage service (byte-range fetches).
    pub data_url: String,

    /// Target-site filter passed to index queries (e.g. "example.com/*").
    pub site_filter: String,

    /// Maximum in-flight fetches.
    pub concurrency: usize,

    /// Attempt budget per task, including the first attempt.
    pub max_attempts: u32,

    /// Backoff unit; attempt `n` waits `n * retry_base_delay`.
    pub retry_base_delay: Duration,

    /// Ceiling for a single backoff wait.
    pub retry_max_delay: Duration,

    /// Bounded wait per network attempt.
    pub request_timeout: Duration,

    /// Whether one failed page fails its whole segment.
    pub segment_policy: SegmentPolicy,

    /// Optional pause after each successful range fetch, to stay polite
    /// toward the storage service.
    pub polite_delay: Option<Duration>,

    /// Maximum entries per output container file.
    pub container_cap: usize,

    /// Maximum payload files per payload subdirectory.
    pub payload_dir_cap: usize,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            index_url: "https://index.commoncrawl.org".to_string(),
            data_url: "https://data.commoncrawl.org".to_string(),
            site_filter: String::new(),
            concurrency: 16,
            max_attempts: 5,
            retry_base_delay: Duration::from_secs(3),
            retry_max_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(120),
            segment_policy: SegmentPolicy::Partial,
            polite_delay: Some(Duration::from_millis(100)),
            container_cap: 50_000,
            payload_dir_cap: 5_000,
        }
    }
}

impl HarvestConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.retry_base_delay, self.retry_max_delay)
    }
}

/// On-disk layout of a harvest working directory.
#[derive(Debug, Clone)]
pub struct HarvestPaths {
    root: PathBuf,
}

impl HarvestPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persisted task catalog (JSON lines, append-only).
    pub fn catalog_file(&self) -> PathBuf {
        self.root.join("tasks.jsonl")
    }

    /// Completion log (one task key per line, append-only).
    pub fn ledger_file(&self) -> PathBuf {
        self.root.join("completed.log")
    }

    /// Directory of record containers.
    pub fn containers_dir(&self) -> PathBuf {
        self.root.join("batches")
    }

    /// Directory of raw payload batches.
    pub fn payloads_dir(&self) -> PathBuf {
        self.root.join("payloads")
    }

    /// Durable log of terminally failed tasks.
    pub fn failures_file(&self) -> PathBuf {
        self.root.join("failures.log")
    }

    /// Final deduplicated index.
    pub fn merged_file(&self) -> PathBuf {
        self.root.join("merged.jsonl")
    }
}
