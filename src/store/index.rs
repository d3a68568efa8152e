//! Sidecar index: the newest artifact of one source.
//!
//! Kept as `latest.json` next to the artifacts so the store can answer
//! "what did we store last?" without re-hashing history.  Rewritten
//! atomically (temp file + rename) after every new artifact.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::artifact::Fingerprint;
use crate::error::StoreError;

pub const INDEX_FILE: &str = "latest.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub fingerprint: Fingerprint,
    /// File name relative to the source directory.
    pub file: String,
    pub stored_at: DateTime<Utc>,
}

/// Read the index in `dir`, `Ok(None)` if there is none yet.
pub fn load(dir: &Path) -> Result<Option<IndexEntry>, StoreError> {
    let path = dir.join(INDEX_FILE);
    let raw = match fs::read(&path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(path, e)),
    };
    serde_json::from_slice(&raw)
        .map(Some)
        .map_err(|source| StoreError::Index { path, source })
}

/// Atomically replace the index in `dir` with `entry`.
pub fn save(dir: &Path, entry: &IndexEntry) -> Result<PathBuf, StoreError> {
    let path = dir.join(INDEX_FILE);
    let json = serde_json::to_vec_pretty(entry).map_err(|source| StoreError::Index {
        path: path.clone(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(&json)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;
    tmp.persist(&path)
        .map_err(|e| StoreError::io(path.clone(), e.error))?;
    Ok(path)
}
