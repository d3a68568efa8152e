//! Content-addressed, append-only artifact storage.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//!   <source key>/
//!     20261018T120000.123456789Z_ba7816bf8f01cfea.bin
//!     20261018T120500.987654321Z_3a4f0c9e1d22b710.bin
//!     latest.json
//! ```
//!
//! File names sort by recency.  Artifacts are written through a temporary
//! file and moved into place with a no-clobber rename, so an artifact either
//! exists complete under its final name or not at all, and an existing file
//! is never replaced.  `latest.json` is the only file ever rewritten.
//!
//! ## For contributors
//!
//! The store assumes a single writer per `(root, source key)`.  Two
//! collectors pointed at the same source and root are unsupported; nothing
//! here locks across processes.

mod artifact;
mod index;

pub use artifact::{Artifact, Fingerprint};
pub use index::IndexEntry;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::StoreError;

const ARTIFACT_EXT: &str = "bin";
const STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.9fZ";

/// Result of [`DedupStore::store_if_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    /// `false` when the payload matched the newest stored artifact.
    pub stored: bool,
    /// The new artifact, or the existing one that made this call a no-op.
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
}

/// Per-source state cached after the first lookup.
#[derive(Debug, Default)]
struct SourceState {
    latest: Option<IndexEntry>,
    last_stamp: Option<DateTime<Utc>>,
}

/// Dedup storage rooted at one directory.
#[derive(Debug)]
pub struct DedupStore {
    root: PathBuf,
    sources: HashMap<String, SourceState>,
}

impl DedupStore {
    /// The root (and source directories) are created lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            sources: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the artifacts of `source_key`.
    pub fn source_dir(&self, source_key: &str) -> PathBuf {
        self.root.join(source_key)
    }

    /// Fingerprint of the newest artifact stored for `source_key`, if any.
    pub fn latest(&mut self, source_key: &str) -> Result<Option<&IndexEntry>, StoreError> {
        Ok(self.state(source_key)?.latest.as_ref())
    }

    /// Hash `bytes` and store them unless they match the newest artifact.
    pub fn store_if_changed(
        &mut self,
        source_key: &str,
        bytes: &[u8],
    ) -> Result<StoreOutcome, StoreError> {
        self.store(source_key, &Artifact::new(bytes.to_vec()))
    }

    /// Like [`store_if_changed`] for an already fingerprinted artifact.
    ///
    /// [`store_if_changed`]: DedupStore::store_if_changed
    pub fn store(&mut self, source_key: &str, artifact: &Artifact) -> Result<StoreOutcome, StoreError> {
        let dir = self.source_dir(source_key);
        let state = self.state(source_key)?;

        if let Some(latest) = &state.latest {
            if latest.fingerprint == artifact.fingerprint {
                debug!(source_key, fingerprint = %artifact.fingerprint, "unchanged");
                return Ok(StoreOutcome {
                    stored: false,
                    path: dir.join(&latest.file),
                    fingerprint: artifact.fingerprint.clone(),
                });
            }
        }

        // Strictly increasing per source, even if the clock stalls or steps back.
        let stamp = match state.last_stamp {
            Some(last) if artifact.fetched_at <= last => last + Duration::nanoseconds(1),
            _ => artifact.fetched_at,
        };
        let file = format!(
            "{}_{}.{ARTIFACT_EXT}",
            stamp.format(STAMP_FORMAT),
            artifact.fingerprint.short()
        );
        let path = dir.join(&file);

        fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        let stored = write_new(&dir, &path, artifact)?;

        debug!(source_key, path = %path.display(), stored, "artifact written");

        // The artifact is on disk, so it is the latest from here on even if
        // the index cannot follow.
        let entry = IndexEntry {
            fingerprint: artifact.fingerprint.clone(),
            file,
            stored_at: stamp,
        };
        state.last_stamp = Some(stamp);
        if let Err(e) = index::save(&dir, &entry) {
            warn!(source_key, "index not updated, keeping state in memory: {e}");
        }
        state.latest = Some(entry);
        Ok(StoreOutcome {
            stored,
            path,
            fingerprint: artifact.fingerprint.clone(),
        })
    }

    /// Recompute the fingerprint of a stored artifact from disk.
    pub fn verify(path: &Path) -> Result<Fingerprint, StoreError> {
        let bytes = fs::read(path).map_err(|e| StoreError::io(path, e))?;
        Ok(Fingerprint::of(&bytes))
    }

    /// All artifact files of `source_key`, oldest first.
    pub fn artifacts(&self, source_key: &str) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.source_dir(source_key);
        let mut names = match artifact_names(&dir) {
            Ok(names) => names,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(dir, e)),
        };
        names.sort();
        Ok(names.into_iter().map(|name| dir.join(name)).collect())
    }

    fn state(&mut self, source_key: &str) -> Result<&mut SourceState, StoreError> {
        match self.sources.entry(source_key.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let dir = self.root.join(source_key);
                let indexed = index::load(&dir).unwrap_or_else(|e| {
                    warn!(source_key, "ignoring unreadable index: {e}");
                    None
                });
                let latest = match indexed {
                    Some(latest) => Some(latest),
                    None => recover_latest(&dir)?,
                };
                Ok(entry.insert(SourceState {
                    last_stamp: latest.as_ref().map(|e| e.stored_at),
                    latest,
                }))
            }
        }
    }
}

/// Write `artifact` to `path` without ever replacing an existing file.
///
/// Returns `Ok(false)` if `path` already holds the same content.
fn write_new(dir: &Path, path: &Path, artifact: &Artifact) -> Result<bool, StoreError> {
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    tmp.write_all(&artifact.bytes)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| StoreError::io(tmp.path(), e))?;

    match tmp.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            let existing = DedupStore::verify(path)?;
            if existing == artifact.fingerprint {
                Ok(false)
            } else {
                Err(StoreError::Conflict {
                    path: path.to_path_buf(),
                    existing: existing.to_string(),
                    incoming: artifact.fingerprint.to_string(),
                })
            }
        }
        Err(e) => Err(StoreError::io(path, e.error)),
    }
}

/// Rebuild the index entry from the newest artifact when `latest.json` is
/// missing or unreadable.  Re-hashes exactly one file.
fn recover_latest(dir: &Path) -> Result<Option<IndexEntry>, StoreError> {
    let names = match artifact_names(dir) {
        Ok(names) => names,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::io(dir, e)),
    };
    let Some(file) = names.into_iter().max() else {
        return Ok(None);
    };

    let path = dir.join(&file);
    let fingerprint = DedupStore::verify(&path)?;
    let stored_at = parse_stamp(&file)
        .or_else(|| {
            fs::metadata(&path)
                .and_then(|m| m.modified())
                .ok()
                .map(DateTime::<Utc>::from)
        })
        .unwrap_or_else(Utc::now);
    debug!(path = %path.display(), "recovered latest artifact without index");

    Ok(Some(IndexEntry {
        fingerprint,
        file,
        stored_at,
    }))
}

fn artifact_names(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Ok(name) = entry.file_name().into_string() else {
            continue;
        };
        let is_artifact = !name.starts_with('.')
            && Path::new(&name).extension().is_some_and(|ext| ext == ARTIFACT_EXT);
        if is_artifact {
            names.push(name);
        }
    }
    Ok(names)
}

fn parse_stamp(file: &str) -> Option<DateTime<Utc>> {
    let (stamp, _) = file.split_once('_')?;
    chrono::NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
