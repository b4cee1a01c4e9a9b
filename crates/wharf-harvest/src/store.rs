//! Payload store
//!
//! Raw capture bytes land as content-addressed files (`<key>.warc.gz`)
//! grouped into capped subdirectories (`batch_0004`). Directory numbering
//! follows the same discipline as record containers: monotonic, never
//! reused across restarts. Writes are idempotent by key: a payload that
//! already exists anywhere in the store is left untouched.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::debug;
use wharf_common::Result;

const PAYLOAD_SUFFIX: &str = ".warc.gz";

struct StoreState {
    next_seq: u64,
    count: usize,
    current: Option<PathBuf>,
    known: HashSet<String>,
}

/// Content-addressed store for fetched byte ranges.
pub struct PayloadStore {
    root: PathBuf,
    files_per_dir: usize,
    state: Mutex<StoreState>,
}

impl PayloadStore {
    pub fn open(root: impl Into<PathBuf>, files_per_dir: usize) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let known = scan_payload_keys(&root)?;
        let next_seq = next_sequence(&root)?;
        Ok(Self {
            root,
            files_per_dir: files_per_dir.max(1),
            state: Mutex::new(StoreState {
                next_seq,
                count: 0,
                current: None,
                known,
            }),
        })
    }

    /// Write one payload under its identity key. Returns `false` when the
    /// key is already stored (nothing is rewritten).
    pub fn write(&self, key: &str, bytes: &[u8]) -> Result<bool> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if state.known.contains(key) {
            return Ok(false);
        }

        if state.count >= self.files_per_dir {
            state.current = None;
        }
        let dir = match state.current.clone() {
            Some(dir) => dir,
            None => {
                let dir = self.root.join(format!("batch_{:04}", state.next_seq));
                std::fs::create_dir_all(&dir)?;
                debug!(dir = %dir.display(), "opened payload batch directory");
                state.current = Some(dir.clone());
                state.count = 0;
                state.next_seq += 1;
                dir
            },
        };
        std::fs::write(dir.join(format!("{key}{PAYLOAD_SUFFIX}")), bytes)?;
        state.count += 1;
        state.known.insert(key.to_string());
        Ok(true)
    }

    /// Number of stored payloads.
    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .known
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Identity keys of every payload under `root`, across all batch
/// directories.
pub fn scan_payload_keys(root: &Path) -> Result<HashSet<String>> {
    let mut keys = HashSet::new();
    if !root.exists() {
        return Ok(keys);
    }
    for entry in std::fs::read_dir(root)? {
        let dir = entry?.path();
        if !dir.is_dir() {
            continue;
        }
        for file in std::fs::read_dir(&dir)? {
            let path = file?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(key) = name.strip_suffix(PAYLOAD_SUFFIX) {
                keys.insert(key.to_string());
            }
        }
    }
    Ok(keys)
}

fn next_sequence(root: &Path) -> Result<u64> {
    let mut max_seen = None;
    for entry in std::fs::read_dir(root)? {
        let path = entry?.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(seq) = name
            .strip_prefix("batch_")
            .and_then(|n| n.parse::<u64>().ok())
        {
            max_seen = Some(max_seen.map_or(seq, |m: u64| m.max(seq)));
        }
    }
    Ok(max_seen.map_or(0, |m| m + 1))
}
