//! Fingerprinted payloads.
//!
//! An [`Artifact`] is what the store receives: the raw bytes of one fetch,
//! their SHA-256 [`Fingerprint`], and the time they were fetched.  The store
//! never looks inside the bytes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hex characters of the fingerprint kept in artifact file names.
pub const SHORT_LEN: usize = 16;

/// Lowercase hex SHA-256 of a payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used in file names.
    pub fn short(&self) -> &str {
        let hex = self.as_str();
        &hex[..SHORT_LEN.min(hex.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieved payload.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub fetched_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self::at(bytes, Utc::now())
    }

    pub fn at(bytes: Vec<u8>, fetched_at: DateTime<Utc>) -> Self {
        let fingerprint = Fingerprint::of(&bytes);
        Self {
            bytes,
            fingerprint,
            fetched_at,
        }
    }
}
