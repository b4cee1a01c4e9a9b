//! Fetch worker pool
//!
//! A bounded set of async workers drains a shared task queue. Workers hold
//! no shared mutable state beyond the queue itself; every result is sent
//! over a channel to the single consumer that owns ledger and batcher
//! mutation. A cooperative stop signal lets in-flight attempts finish but
//! starts no new tasks or retries.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, warn};
use wharf_common::Result;

use crate::catalog::Task;
use crate::client::ArchiveClient;
use crate::config::{HarvestConfig, SegmentPolicy};
use crate::error::{FetchError, RetryDecision};
use crate::record::RawRecord;

/// Everything a worker needs, passed explicitly.
pub struct HarvestContext {
    pub config: HarvestConfig,
    pub client: ArchiveClient,
}

impl HarvestContext {
    pub fn new(config: HarvestConfig) -> Result<Self> {
        let client = ArchiveClient::new(&config)?;
        Ok(Self { config, client })
    }
}

/// Payload of a successful task.
#[derive(Debug)]
pub enum TaskOutput {
    /// Records parsed from an index page.
    Records(Vec<RawRecord>),
    /// Raw bytes of a range fetch.
    Payload(Vec<u8>),
}

/// Terminal state of one task attempt sequence.
#[derive(Debug)]
pub enum TaskResult {
    Success(TaskOutput),
    Failed(FetchError),
    /// Not attempted: the segment was already failed by policy.
    SegmentAborted,
}

/// What a worker reports back for one task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub attempts: u32,
    /// Whether a stop request cut the attempt sequence short.
    pub interrupted: bool,
    pub result: TaskResult,
}

pub type SharedQueue = Arc<Mutex<VecDeque<Task>>>;
pub type CancelledSegments = Arc<RwLock<HashSet<String>>>;

/// Spawn the configured number of workers over `queue`. The returned set
/// completes once the queue is drained or a stop is requested; the outcome
/// channel closes with it.
pub fn spawn_workers(
    ctx: Arc<HarvestContext>,
    queue: SharedQueue,
    cancelled: CancelledSegments,
    stop: watch::Receiver<bool>,
    outcomes: mpsc::Sender<TaskOutcome>,
) -> JoinSet<()> {
    let mut workers = JoinSet::new();
    for worker_id in 0..ctx.config.concurrency.max(1) {
        workers.spawn(worker_loop(
            worker_id,
            Arc::clone(&ctx),
            Arc::clone(&queue),
            Arc::clone(&cancelled),
            stop.clone(),
            outcomes.clone(),
        ));
    }
    workers
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<HarvestContext>,
    queue: SharedQueue,
    cancelled: CancelledSegments,
    stop: watch::Receiver<bool>,
    outcomes: mpsc::Sender<TaskOutcome>,
) {
    loop {
        if *stop.borrow() {
            debug!(worker_id, "stop requested, worker exiting");
            break;
        }

        let next = queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let Some(task) = next else {
            break;
        };

        if let Some(segment) = task.segment() {
            let aborted = cancelled
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .contains(segment);
            if aborted {
                let outcome = TaskOutcome {
                    task,
                    attempts: 0,
                    interrupted: false,
                    result: TaskResult::SegmentAborted,
                };
                if outcomes.send(outcome).await.is_err() {
                    break;
                }
                continue;
            }
        }

        let outcome = execute_task(&ctx, task, &stop).await;

        // Under the fail-fast policy a terminally failed page takes its
        // whole segment down; mark it before reporting so siblings still
        // queued are skipped, not started.
        if matches!(outcome.result, TaskResult::Failed(_))
            && !outcome.interrupted
            && ctx.config.segment_policy == SegmentPolicy::FailFast
        {
            if let Some(segment) = outcome.task.segment() {
                warn!(segment, "segment failed, cancelling its remaining pages");
                cancelled
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(segment.to_string());
            }
        }

        let pause_after = matches!(
            (&outcome.result, &outcome.task),
            (TaskResult::Success(_), Task::Range { .. })
        );
        if outcomes.send(outcome).await.is_err() {
            // Consumer is gone; nothing useful left to do.
            break;
        }
        if pause_after {
            if let Some(delay) = ctx.config.polite_delay {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Run one task through its full attempt sequence.
async fn execute_task(
    ctx: &HarvestContext,
    task: Task,
    stop: &watch::Receiver<bool>,
) -> TaskOutcome {
    let policy = ctx.config.retry_policy();
    let mut attempt = 0;
    loop {
        attempt += 1;
        let result = match &task {
            Task::IndexPage { url, .. } => ctx
                .client
                .fetch_index_page(url)
                .await
                .map(TaskOutput::Records),
            Task::Range {
                filename,
                offset,
                length,
                ..
            } => ctx
                .client
                .fetch_range(filename, *offset, *length)
                .await
                .map(TaskOutput::Payload),
        };

        let error = match result {
            Ok(output) => {
                return TaskOutcome {
                    task,
                    attempts: attempt,
                    interrupted: false,
                    result: TaskResult::Success(output),
                }
            },
            Err(error) => error,
        };

        match policy.decide(attempt, &error) {
            RetryDecision::Retry(delay) => {
                warn!(
                    task = %task.key(),
                    attempt,
                    error = %error,
                    "attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
                if *stop.borrow() {
                    return TaskOutcome {
                        task,
                        attempts: attempt,
                        interrupted: true,
                        result: TaskResult::Failed(error),
                    };
                }
            },
            RetryDecision::GiveUp => {
                return TaskOutcome {
                    task,
                    attempts: attempt,
                    interrupted: false,
                    result: TaskResult::Failed(error),
                };
            },
        }
    }
}
