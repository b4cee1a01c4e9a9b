//! Wharf Harvest Library
//!
//! Resumable, concurrent harvesting of web-archive index records and raw
//! capture bytes, and reconciliation of duplicate observations into one
//! best record per page.
//!
//! # Pipeline
//!
//! 1. **Enumerate** ([`catalog`]): resolve each archive segment to its page
//!    count and persist one fetch task per page.
//! 2. **Fetch** ([`pool`], [`runner`]): a bounded worker pool drains the
//!    catalog with retry/backoff, skipping tasks the completion ledger
//!    already holds, and appends results to size-bounded output containers.
//! 3. **Merge** ([`merge`]): fold every observed record down to a single
//!    winner per canonical page.
//! 4. **Fetch payloads** ([`catalog::range_tasks_from_index`], [`store`]):
//!    byte-range downloads of the winning captures, verified by length.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use wharf_harvest::catalog::load_tasks;
//! use wharf_harvest::config::{HarvestConfig, HarvestPaths};
//! use wharf_harvest::pool::HarvestContext;
//! use wharf_harvest::runner::run_harvest;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = HarvestConfig {
//!         site_filter: "example.com/*".to_string(),
//!         ..HarvestConfig::default()
//!     };
//!     let paths = HarvestPaths::new("./data");
//!     let tasks = load_tasks(&paths.catalog_file())?;
//!     let ctx = Arc::new(HarvestContext::new(config)?);
//!     let (_stop_tx, stop) = tokio::sync::watch::channel(false);
//!     let summary = run_harvest(ctx, &paths, tasks, stop).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

pub mod batcher;
pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod ledger;
pub mod merge;
pub mod pool;
pub mod record;
pub mod report;
pub mod runner;
pub mod store;

pub use catalog::Task;
pub use config::{HarvestConfig, HarvestPaths, SegmentPolicy};
pub use error::{FetchError, RetryDecision, RetryPolicy};
pub use pool::HarvestContext;
pub use record::RawRecord;
pub use report::RunSummary;
