//! Output batcher
//!
//! Successful index fetches append their records to size-bounded container
//! files (`batch_000042.jsonl`). The choice of "current container, and is it
//! full" is one serialized decision; container numbers are monotonic and
//! never reused, so a restarted process always opens a fresh container
//! instead of touching one an earlier run considered closed.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;
use wharf_common::Result;

use crate::record::RawRecord;

/// One output line: the producing task's identity key plus the observed
/// record. Carrying the key makes completion recoverable from the output
/// store alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEntry {
    pub task: String,
    pub record: RawRecord,
}

struct BatcherState {
    next_seq: u64,
    count: usize,
    writer: Option<BufWriter<File>>,
}

/// Writer of record containers with a per-container entry cap.
pub struct OutputBatcher {
    dir: PathBuf,
    cap: usize,
    state: Mutex<BatcherState>,
}

impl OutputBatcher {
    /// Open a batcher over `dir`, creating it if needed. Numbering starts
    /// past the highest existing container.
    pub fn open(dir: impl Into<PathBuf>, cap: usize) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let next_seq = next_sequence(&dir)?;
        Ok(Self {
            dir,
            cap: cap.max(1),
            state: Mutex::new(BatcherState {
                next_seq,
                count: 0,
                writer: None,
            }),
        })
    }

    /// Append all of a task's records, rolling containers as they fill.
    /// Data is flushed before returning so a subsequent ledger append never
    /// precedes it.
    pub fn append(&self, task_key: &str, records: &[RawRecord]) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        for record in records {
            if state.writer.is_none() || state.count >= self.cap {
                self.roll(&mut state)?;
            }
            let entry = BatchEntry {
                task: task_key.to_string(),
                record: record.clone(),
            };
            if let Some(writer) = state.writer.as_mut() {
                serde_json::to_writer(&mut *writer, &entry)?;
                writer.write_all(b"\n")?;
            }
            state.count += 1;
        }

        if let Some(writer) = state.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn roll(&self, state: &mut BatcherState) -> Result<()> {
        let path = container_path(&self.dir, state.next_seq);
        // create_new guards against a second process racing on the same
        // sequence number.
        let file = OpenOptions::new().create_new(true).write(true).open(&path)?;
        debug!(container = %path.display(), "opened output container");
        state.writer = Some(BufWriter::new(file));
        state.count = 0;
        state.next_seq += 1;
        Ok(())
    }
}

/// Path of the container with the given sequence number.
pub fn container_path(dir: &Path, seq: u64) -> PathBuf {
    dir.join(format!("batch_{seq:06}.jsonl"))
}

/// All container files under `dir`, sorted by name (and therefore by
/// sequence number).
pub fn container_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "jsonl") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// First unused container sequence number in `dir`.
fn next_sequence(dir: &Path) -> Result<u64> {
    let mut max_seen = None;
    for path in container_files(dir)? {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if let Some(seq) = stem
            .strip_prefix("batch_")
            .and_then(|n| n.parse::<u64>().ok())
        {
            max_seen = Some(max_seen.map_or(seq, |m: u64| m.max(seq)));
        }
    }
    Ok(max_seen.map_or(0, |m| m + 1))
}

/// Task keys recoverable from the containers in `dir`. Corrupt lines are
/// ignored; an interrupted write trailing a container must not poison the
/// scan.
pub fn scan_container_keys(dir: &Path) -> Result<HashSet<String>> {
    let mut keys = HashSet::new();
    for path in container_files(dir)? {
        let reader = BufReader::new(File::open(&path)?);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<BatchEntry>(&line) {
                keys.insert(entry.task);
            }
        }
    }
    Ok(keys)
}
