//! Error taxonomy for the collector.
//!
//! The fetcher and the store hand one of these values back to the
//! scheduler, which decides whether a failure ends the run or just the
//! current cycle.  See [`CollectorError::is_fatal`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure while configuring an outbound request.
///
/// Raised by [`crate::fetch::FetchOptionsBuilder::build`] before any request
/// exists, so a bad option can never leave a half-configured request behind.
#[derive(Debug, Error)]
pub enum OptionError {
    #[error("option `{name}` is not a valid header value: {value:?}")]
    InvalidHeader { name: &'static str, value: String },

    #[error("option `{0}` must not be empty")]
    Empty(&'static str),
}

/// Failure of a single fetch attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("unsupported protocol in source {uri:?} (supported: {supported})")]
    UnsupportedProtocol { uri: String, supported: String },

    #[error("invalid request option: {0}")]
    Option(#[from] OptionError),

    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),

    /// The surrounding context was cancelled while the request was in flight.
    #[error("fetch cancelled")]
    Cancelled,

    #[error("HTTP status {status}: {snippet}")]
    HttpStatus { status: u16, snippet: String },

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FetchError {
    /// Transport-level failures, cancellation included.
    pub fn is_network(&self) -> bool {
        matches!(self, FetchError::Network(_) | FetchError::Cancelled)
    }
}

/// Failure while persisting an artifact.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// An artifact with the generated name already exists with different
    /// content.  The naming scheme failed to produce a unique name.
    #[error("storage conflict: {path} already exists with fingerprint {existing}, refusing to store {incoming}")]
    Conflict {
        path: PathBuf,
        existing: String,
        incoming: String,
    },

    #[error("sidecar index {path} is unreadable: {source}")]
    Index {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invalid startup configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no source given")]
    MissingSource,

    #[error(transparent)]
    Source(#[from] FetchError),

    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("jitter ({jitter:?}) must not exceed interval ({interval:?})")]
    JitterExceedsInterval {
        jitter: std::time::Duration,
        interval: std::time::Duration,
    },

    #[error("storage root {path} is not a directory")]
    StorageNotDirectory { path: PathBuf },

    #[error("storage root {path} is not writable: {source}")]
    StorageNotWritable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("could not create temporary storage root: {0}")]
    TempStorage(#[source] io::Error),

    #[error("invalid duration {0:?} (expected e.g. 500ms, 23s, 5m, 1h30m)")]
    Duration(String),
}

/// Anything that can end a cycle or a run.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CollectorError {
    /// Whether this error must stop the scheduler.
    ///
    /// In once mode every error is final.  In recurring mode only
    /// misconfiguration and naming conflicts are; everything else is retried
    /// on the next scheduled cycle.
    pub fn is_fatal(&self, once: bool) -> bool {
        if once {
            return true;
        }
        matches!(
            self,
            CollectorError::Fetch(FetchError::UnsupportedProtocol { .. })
                | CollectorError::Store(StoreError::Conflict { .. })
        )
    }
}
