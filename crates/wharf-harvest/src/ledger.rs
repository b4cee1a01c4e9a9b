//! Completion ledger
//!
//! Durable record of which tasks finished successfully; the source of truth
//! for resume. The on-disk log (one key per line, append-only, flushed per
//! append) can lag the output store across an unclean shutdown, and vice
//! versa, so the startup view is the union of every completion source.
//! A key present in only one source costs at most one re-fetch, which is
//! safe because all output writes are idempotent by key.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;
use wharf_common::Result;

use crate::batcher::scan_container_keys;
use crate::store::scan_payload_keys;

/// Anything that can attest task completion.
pub trait CompletionSource {
    fn completed_keys(&self) -> Result<HashSet<String>>;
}

/// Completion attested by the append-only log file.
pub struct LogSource {
    path: PathBuf,
}

impl LogSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CompletionSource for LogSource {
    fn completed_keys(&self) -> Result<HashSet<String>> {
        let mut keys = HashSet::new();
        if !self.path.exists() {
            return Ok(keys);
        }
        let reader = BufReader::new(File::open(&self.path)?);
        for line in reader.lines() {
            let line = line?;
            let key = line.trim();
            if !key.is_empty() {
                keys.insert(key.to_string());
            }
        }
        Ok(keys)
    }
}

/// Completion inferred from artifacts already present in the output store:
/// task keys carried by container entries, and payload file stems.
pub struct OutputScanSource {
    containers_dir: PathBuf,
    payloads_dir: PathBuf,
}

impl OutputScanSource {
    pub fn new(containers_dir: impl Into<PathBuf>, payloads_dir: impl Into<PathBuf>) -> Self {
        Self {
            containers_dir: containers_dir.into(),
            payloads_dir: payloads_dir.into(),
        }
    }
}

impl CompletionSource for OutputScanSource {
    fn completed_keys(&self) -> Result<HashSet<String>> {
        let mut keys = scan_container_keys(&self.containers_dir)?;
        keys.extend(scan_payload_keys(&self.payloads_dir)?);
        Ok(keys)
    }
}

/// In-memory completion set backed by the append-only log.
pub struct CompletionLedger {
    done: HashSet<String>,
    writer: BufWriter<File>,
}

impl CompletionLedger {
    /// Open the ledger at `path`, rebuilding the in-memory set as the union
    /// of the log itself and every extra source.
    pub fn open(path: &Path, extra_sources: &[&dyn CompletionSource]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut done = LogSource::new(path).completed_keys()?;
        let from_log = done.len();
        for source in extra_sources {
            done.extend(source.completed_keys()?);
        }
        if done.len() > from_log {
            info!(
                recovered = done.len() - from_log,
                "recovered completions from output artifacts not present in the log"
            );
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            done,
            writer: BufWriter::new(file),
        })
    }

    pub fn is_complete(&self, key: &str) -> bool {
        self.done.contains(key)
    }

    /// Durably record a completion. Duplicate marks are no-ops.
    pub fn mark_complete(&mut self, key: &str) -> Result<()> {
        if self.done.insert(key.to_string()) {
            self.writer.write_all(key.as_bytes())?;
            self.writer.write_all(b"\n")?;
            // Flushed per entry so concurrent readers always see a prefix.
            self.writer.flush()?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batcher::OutputBatcher;
    use crate::record::RawRecord;
    use tempfile::TempDir;

    fn record(url: &str) -> RawRecord {
        serde_json::from_str(&format!(
            r#"{{"url":"{url}","status":"200","length":"10","timestamp":"2024"}}"#
        ))
        .unwrap()
    }

    #[test]
    fn test_mark_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("completed.log");
        {
            let mut ledger = CompletionLedger::open(&path, &[]).unwrap();
            ledger.mark_complete("SEG-A_0").unwrap();
            ledger.mark_complete("SEG-A_1").unwrap();
            ledger.mark_complete("SEG-A_0").unwrap();
            assert_eq!(ledger.len(), 2);
        }

        let ledger = CompletionLedger::open(&path, &[]).unwrap();
        assert!(ledger.is_complete("SEG-A_0"));
        assert!(ledger.is_complete("SEG-A_1"));
        assert!(!ledger.is_complete("SEG-B_0"));
        // Duplicate marks stay single lines in the log.
        let lines = std::fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 2);
    }

    #[test]
    fn test_union_with_output_scan() {
        let dir = TempDir::new().unwrap();
        let containers = dir.path().join("batches");
        let payloads = dir.path().join("payloads");
        let log_path = dir.path().join("completed.log");

        // One completion only in the log.
        {
            let mut ledger = CompletionLedger::open(&log_path, &[]).unwrap();
            ledger.mark_complete("SEG-A_0").unwrap();
        }
        // One completion only in the output store (crash before the ledger
        // append).
        let batcher = OutputBatcher::open(&containers, 10).unwrap();
        batcher.append("SEG-A_1", &[record("https://e.com/a")]).unwrap();

        let scan = OutputScanSource::new(&containers, &payloads);
        let ledger = CompletionLedger::open(&log_path, &[&scan]).unwrap();
        assert!(ledger.is_complete("SEG-A_0"));
        assert!(ledger.is_complete("SEG-A_1"));
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn test_payload_keys_counted() {
        let dir = TempDir::new().unwrap();
        let payloads = dir.path().join("payloads");
        let store = crate::store::PayloadStore::open(&payloads, 10).unwrap();
        store.write("deadbeef", b"bytes").unwrap();

        let scan = OutputScanSource::new(dir.path().join("batches"), &payloads);
        let keys = scan.completed_keys().unwrap();
        assert!(keys.contains("deadbeef"));
    }
}
