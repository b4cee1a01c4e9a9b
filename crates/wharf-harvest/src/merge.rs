//! Record merge engine
//!
//! Many segments observe the same logical page. This module collapses all
//! observations sharing a canonical entity key into the single best record:
//! successful captures beat errors, HTML beats other types, larger payloads
//! beat smaller ones, newer captures beat older ones. The preference is a
//! deterministic total order, so the winner does not depend on the order in
//! which records are folded in.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use tracing::{info, warn};
use url::Url;
use wharf_common::Result;

use crate::batcher::{container_files, BatchEntry};
use crate::record::RawRecord;

/// Canonical identity of a logical page.
///
/// Host casing, a leading `www.` label, the scheme, and trailing slashes do
/// not distinguish pages; the query string does. Unparseable URLs fall back
/// to the raw string.
pub fn entity_key(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.to_string();
    };
    let host = parsed.host_str().unwrap_or("").to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let path = parsed.path().trim_end_matches('/');
    match parsed.query() {
        Some(query) => format!("{host}{path}?{query}"),
        None => format!("{host}{path}"),
    }
}

/// Quality rank: compared lexicographically, higher wins.
fn rank(record: &RawRecord) -> (bool, bool, u64, &str) {
    (
        record.status == "200",
        record.is_html(),
        record.length,
        record.timestamp.as_str(),
    )
}

/// Deterministic tie-break over remaining content, so records that rank
/// equally still resolve to the same winner regardless of fold order.
fn content_order(
    record: &RawRecord,
) -> (
    &str,
    &str,
    Option<&str>,
    Option<&str>,
    Option<&str>,
    Option<&str>,
    Option<u64>,
) {
    (
        record.url.as_str(),
        record.status.as_str(),
        record.digest.as_deref(),
        record.mime_detected.as_deref(),
        record.mime.as_deref(),
        record.filename.as_deref(),
        record.offset,
    )
}

/// Whether `candidate` replaces `incumbent` as the best observation.
/// Byte-identical records keep the incumbent.
pub fn candidate_wins(incumbent: &RawRecord, candidate: &RawRecord) -> bool {
    use std::cmp::Ordering;
    match rank(candidate).cmp(&rank(incumbent)) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal => content_order(candidate).cmp(&content_order(incumbent)) == Ordering::Greater,
    }
}

/// Fold records into one winner per entity key. Records without a URL are
/// dropped.
pub fn fold_records<I>(records: I) -> BTreeMap<String, RawRecord>
where
    I: IntoIterator<Item = RawRecord>,
{
    use std::collections::btree_map::Entry;

    let mut best: BTreeMap<String, RawRecord> = BTreeMap::new();
    for record in records {
        if record.url.is_empty() {
            continue;
        }
        match best.entry(entity_key(&record.url)) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            },
            Entry::Occupied(mut slot) => {
                if candidate_wins(slot.get(), &record) {
                    slot.insert(record);
                }
            },
        }
    }
    best
}

/// Load every container under `dir` and fold all records down to one winner
/// per entity key. Corrupt lines are skipped.
pub fn merge_containers(dir: &Path) -> Result<BTreeMap<String, RawRecord>> {
    let files = container_files(dir)?;
    if files.is_empty() {
        warn!(dir = %dir.display(), "no containers found to merge");
        return Ok(BTreeMap::new());
    }

    let mut loaded = 0usize;
    let mut best = BTreeMap::new();
    for path in files {
        let reader = BufReader::new(File::open(&path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if let Ok(entry) = serde_json::from_str::<BatchEntry>(&line) {
                records.push(entry.record);
            }
        }
        loaded += records.len();
        // Folding is associative, so feeding containers incrementally gives
        // the same winners as one pass over everything.
        best = fold_records(best.into_values().chain(records));
    }

    info!(loaded, unique = best.len(), "merged container records");
    Ok(best)
}

/// Write merged records as newline-delimited JSON, sorted by entity key.
pub fn write_merged(merged: &BTreeMap<String, RawRecord>, path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for record in merged.values() {
        serde_json::to_writer(&mut writer, record)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(merged.len())
}
