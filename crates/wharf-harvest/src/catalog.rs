//! Task catalog
//!
//! The flat, persisted set of fetch work items. Enumeration resolves each
//! archive segment to its page count once, appends one task per page to the
//! catalog file, and is idempotent: segments already present in the
//! persisted catalog are skipped without contacting the remote service.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use wharf_common::checksum::sha256_hex;
use wharf_common::Result;

use crate::client::ArchiveClient;
use crate::record::RawRecord;

/// One unit of fetch work. Immutable once created; completion is tracked
/// separately by the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Task {
    /// One page of a segment's index query.
    IndexPage {
        segment: String,
        page: u32,
        /// Fully-formed query URL, fixed at enumeration time.
        url: String,
    },
    /// One byte range of a raw storage file, holding the capture of
    /// `page_url`.
    Range {
        page_url: String,
        filename: String,
        offset: u64,
        length: u64,
    },
}

impl Task {
    /// Durable identity key: `segment_page` for index pages, a content hash
    /// of the captured URL for ranges (which doubles as the payload file
    /// stem).
    pub fn key(&self) -> String {
        match self {
            Task::IndexPage { segment, page, .. } => format!("{segment}_{page}"),
            Task::Range { page_url, .. } => sha256_hex(page_url.as_bytes()),
        }
    }

    /// Human-readable request target, for logs and failure reports.
    pub fn locator(&self) -> String {
        match self {
            Task::IndexPage { url, .. } => url.clone(),
            Task::Range {
                filename,
                offset,
                length,
                ..
            } => format!("{filename}@{offset}+{length}"),
        }
    }

    /// Segment this task belongs to, if any.
    pub fn segment(&self) -> Option<&str> {
        match self {
            Task::IndexPage { segment, .. } => Some(segment),
            Task::Range { .. } => None,
        }
    }
}

/// Outcome of one enumeration pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnumerationSummary {
    /// Tasks appended this pass.
    pub generated: usize,
    /// Segments skipped because the catalog already held their tasks.
    pub skipped: usize,
}

/// Load every task from the catalog file, preserving order. Corrupt lines
/// are skipped.
pub fn load_tasks(path: &Path) -> Result<Vec<Task>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut tasks = Vec::new();
    let mut corrupt = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Task>(&line) {
            Ok(task) => tasks.push(task),
            Err(_) => corrupt += 1,
        }
    }
    if corrupt > 0 {
        warn!(path = %path.display(), corrupt, "skipped corrupt catalog lines");
    }
    Ok(tasks)
}

/// Append tasks to the catalog file, flushing before returning.
pub fn append_tasks(path: &Path, tasks: &[Task]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = BufWriter::new(file);
    for task in tasks {
        serde_json::to_writer(&mut writer, task)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Segments whose tasks are already durably persisted in the catalog.
pub fn enumerated_segments(path: &Path) -> Result<HashSet<String>> {
    let mut segments = HashSet::new();
    for task in load_tasks(path)? {
        if let Task::IndexPage { segment, .. } = task {
            segments.insert(segment);
        }
    }
    Ok(segments)
}

/// Resolve page counts for `segments` and append one `IndexPage` task per
/// (segment, page) to the catalog.
///
/// Segments already present in the catalog are skipped without a network
/// round trip, so re-running enumeration never duplicates tasks.
pub async fn enumerate_index_tasks(
    client: &ArchiveClient,
    segments: &[String],
    catalog_path: &Path,
) -> Result<EnumerationSummary> {
    let already_done = enumerated_segments(catalog_path)?;
    let mut summary = EnumerationSummary::default();

    for segment in segments {
        if already_done.contains(segment) {
            debug!(segment = %segment, "segment already enumerated, skipping");
            summary.skipped += 1;
            continue;
        }

        let pages = client.page_count(segment).await;
        let tasks: Vec<Task> = (0..pages)
            .map(|page| Task::IndexPage {
                segment: segment.clone(),
                page,
                url: client.index_page_url(segment, page),
            })
            .collect();

        // One segment's tasks land atomically enough: appended together and
        // flushed before the next probe.
        append_tasks(catalog_path, &tasks)?;
        info!(segment = %segment, pages, "enumerated segment");
        summary.generated += tasks.len();
    }

    Ok(summary)
}

/// Build byte-range tasks from a merged index file.
///
/// Only successful captures with a complete storage locator are worth
/// downloading; duplicates (by identity key) collapse to one task.
pub fn range_tasks_from_index(index_path: &Path) -> Result<Vec<Task>> {
    let reader = BufReader::new(File::open(index_path)?);
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(record) = serde_json::from_str::<RawRecord>(&line) else {
            continue;
        };
        if record.status != "200" || record.url.is_empty() || !record.has_locator() {
            continue;
        }
        let (Some(filename), Some(offset)) = (record.filename.clone(), record.offset) else {
            continue;
        };
        let task = Task::Range {
            page_url: record.url,
            filename,
            offset,
            length: record.length,
        };
        if seen.insert(task.key()) {
            tasks.push(task);
        }
    }

    Ok(tasks)
}
