//! Harvest run orchestration
//!
//! Wires the catalog, ledger, batcher, payload store and worker pool
//! together for one run. The consumer loop here is the only place output
//! and ledger mutation happens, and it always writes output before the
//! ledger entry; a crash between the two costs at most one idempotent
//! re-fetch on resume.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use wharf_common::Result;

use crate::batcher::OutputBatcher;
use crate::catalog::Task;
use crate::config::HarvestPaths;
use crate::error::FetchError;
use crate::ledger::{CompletionLedger, OutputScanSource};
use crate::pool::{
    spawn_workers, CancelledSegments, HarvestContext, SharedQueue, TaskOutcome, TaskOutput,
    TaskResult,
};
use crate::report::{FailureLog, RunSummary};
use crate::store::PayloadStore;

/// Run the pool over `tasks`, skipping work the ledger already holds.
///
/// Honors the stop signal: a run interrupted by `stop` leaves everything in
/// a state the next run resumes from with no special handling.
pub async fn run_harvest(
    ctx: Arc<HarvestContext>,
    paths: &HarvestPaths,
    tasks: Vec<Task>,
    stop: watch::Receiver<bool>,
) -> Result<RunSummary> {
    std::fs::create_dir_all(paths.root())?;

    let scan = OutputScanSource::new(paths.containers_dir(), paths.payloads_dir());
    let mut ledger = CompletionLedger::open(&paths.ledger_file(), &[&scan])?;
    let batcher = OutputBatcher::open(paths.containers_dir(), ctx.config.container_cap)?;
    let store = PayloadStore::open(paths.payloads_dir(), ctx.config.payload_dir_cap)?;
    let failures = FailureLog::open(&paths.failures_file())?;

    let mut summary = RunSummary {
        total: tasks.len(),
        ..RunSummary::default()
    };

    let todo: VecDeque<Task> = tasks
        .into_iter()
        .filter(|task| {
            let done = ledger.is_complete(&task.key());
            if done {
                summary.skipped += 1;
            }
            !done
        })
        .collect();

    if todo.is_empty() {
        info!(total = summary.total, "all tasks already complete");
        return Ok(summary);
    }
    info!(
        pending = todo.len(),
        skipped = summary.skipped,
        workers = ctx.config.concurrency,
        "starting harvest run"
    );

    let progress = ProgressBar::new(todo.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta})",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let queue: SharedQueue = Arc::new(Mutex::new(todo));
    let cancelled: CancelledSegments = Arc::new(RwLock::new(HashSet::new()));
    let (outcome_tx, mut outcome_rx) = mpsc::channel(ctx.config.concurrency.max(1) * 2);
    let mut workers = spawn_workers(
        Arc::clone(&ctx),
        Arc::clone(&queue),
        Arc::clone(&cancelled),
        stop,
        outcome_tx,
    );

    while let Some(outcome) = outcome_rx.recv().await {
        consume_outcome(outcome, &batcher, &store, &mut ledger, &failures, &mut summary);
        progress.inc(1);
    }
    while workers.join_next().await.is_some() {}
    progress.finish_and_clear();

    info!(%summary, "harvest run finished");
    Ok(summary)
}

/// Apply one worker outcome. Output writes happen before the ledger append.
fn consume_outcome(
    outcome: TaskOutcome,
    batcher: &OutputBatcher,
    store: &PayloadStore,
    ledger: &mut CompletionLedger,
    failures: &FailureLog,
    summary: &mut RunSummary,
) {
    let key = outcome.task.key();
    match outcome.result {
        TaskResult::Success(output) => {
            let written = match output {
                TaskOutput::Records(records) => batcher
                    .append(&key, &records)
                    .and_then(|()| ledger.mark_complete(&key)),
                TaskOutput::Payload(bytes) => store
                    .write(&key, &bytes)
                    .and_then(|_| ledger.mark_complete(&key)),
            };
            match written {
                Ok(()) => summary.succeeded += 1,
                Err(persist_error) => {
                    // Local disk trouble does not self-heal; fail the task
                    // and keep the run going.
                    summary.failed += 1;
                    error!(task = %key, error = %persist_error, "failed to persist output");
                    let as_fetch_error =
                        FetchError::Persistence(std::io::Error::other(persist_error.to_string()));
                    if let Err(log_error) =
                        failures.record(&outcome.task, &as_fetch_error, outcome.attempts)
                    {
                        error!(error = %log_error, "failed to append failure log");
                    }
                },
            }
        },
        TaskResult::Failed(_) if outcome.interrupted => {
            summary.interrupted += 1;
        },
        TaskResult::Failed(fetch_error) => {
            summary.failed += 1;
            error!(
                task = %key,
                locator = %outcome.task.locator(),
                class = fetch_error.class(),
                attempts = outcome.attempts,
                error = %fetch_error,
                "task failed"
            );
            if let Err(log_error) = failures.record(&outcome.task, &fetch_error, outcome.attempts)
            {
                error!(error = %log_error, "failed to append failure log");
            }
        },
        TaskResult::SegmentAborted => {
            summary.aborted += 1;
        },
    }
}
