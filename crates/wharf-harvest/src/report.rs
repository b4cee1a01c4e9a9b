//! Run reporting
//!
//! Counters for the operator-facing run summary, and a durable failure log
//! an operator can feed into a narrower re-run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

use wharf_common::Result;

use crate::catalog::Task;
use crate::error::FetchError;

/// Outcome counts for one harvest run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Tasks in the catalog for this run.
    pub total: usize,
    /// Tasks skipped because the ledger already held them.
    pub skipped: usize,
    /// Tasks completed and durably recorded this run.
    pub succeeded: usize,
    /// Tasks that failed terminally (fatal, or retry budget exhausted).
    pub failed: usize,
    /// Index pages dropped because their segment was failed by policy.
    pub aborted: usize,
    /// Tasks cut short by a stop request; they remain incomplete and will
    /// be picked up on the next run.
    pub interrupted: usize,
}

impl RunSummary {
    pub fn completed_everything(&self) -> bool {
        self.failed == 0 && self.aborted == 0 && self.interrupted == 0
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} total, {} already complete, {} succeeded, {} failed, {} aborted, {} interrupted",
            self.total, self.skipped, self.succeeded, self.failed, self.aborted, self.interrupted
        )
    }
}

/// Append-only, tab-separated log of terminally failed tasks:
/// `key<TAB>locator<TAB>error class<TAB>attempts<TAB>reason`.
pub struct FailureLog {
    writer: Mutex<BufWriter<File>>,
}

impl FailureLog {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn record(&self, task: &Task, error: &FetchError, attempts: u32) -> Result<()> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}",
            task.key(),
            task.locator(),
            error.class(),
            attempts,
            error
        )?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_failure_log_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failures.log");
        let log = FailureLog::open(&path).unwrap();

        let task = Task::IndexPage {
            segment: "SEG-A".into(),
            page: 2,
            url: "https://index.example/SEG-A-index?page=2".into(),
        };
        let error = FetchError::Fatal {
            status: 404,
            url: task.locator(),
        };
        log.record(&task, &error, 1).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let fields: Vec<&str> = contents.trim_end().split('\t').collect();
        assert_eq!(fields[0], "SEG-A_2");
        assert_eq!(fields[2], "fatal");
        assert_eq!(fields[3], "1");
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            total: 10,
            skipped: 4,
            succeeded: 5,
            failed: 1,
            ..RunSummary::default()
        };
        let text = summary.to_string();
        assert!(text.contains("10 total"));
        assert!(text.contains("5 succeeded"));
        assert!(!summary.completed_everything());
    }
}
