//! The source URI shared by every fetcher.
//!
//! A [`Source`] is just the string the user passed, split at `://`.  Which
//! fetcher handles it is decided by [`Source::scheme`]; where its artifacts
//! land on disk is decided by [`Source::key`].

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::FetchError;

/// Longest slug kept in a storage key before the hash suffix.
const MAX_SLUG_LEN: usize = 64;

/// An immutable source URI with a `scheme://` prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    uri: String,
    /// Byte offset of `://` in `uri`.
    split: usize,
    scheme: String,
}

impl Source {
    /// Parse `uri`, requiring a non-empty alphanumeric scheme followed by `://`.
    ///
    /// Only the shape is checked here; whether the scheme is supported is up
    /// to [`crate::fetch::FetcherRegistry`].
    pub fn parse(uri: &str, supported: &str) -> Result<Self, FetchError> {
        let unsupported = || FetchError::UnsupportedProtocol {
            uri: uri.to_string(),
            supported: supported.to_string(),
        };

        let split = uri.find("://").ok_or_else(unsupported)?;
        let scheme = &uri[..split];
        let valid = !scheme.is_empty()
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !valid || uri.len() == split + 3 {
            return Err(unsupported());
        }

        Ok(Self {
            uri: uri.to_string(),
            split,
            scheme: scheme.to_ascii_lowercase(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.uri
    }

    /// Lowercased protocol name without the `://`.
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// Everything after `://`.
    pub fn rest(&self) -> &str {
        &self.uri[self.split + 3..]
    }

    /// Filesystem-safe storage key for this source.
    ///
    /// A readable slug of host and path followed by the first 8 hex chars of
    /// the SHA-256 of the full URI, so two URIs that slug the same still get
    /// different keys.
    pub fn key(&self) -> String {
        let mut slug = String::with_capacity(MAX_SLUG_LEN);
        let mut last_was_sep = true;
        for c in self.rest().chars() {
            if slug.len() >= MAX_SLUG_LEN {
                break;
            }
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                slug.push(c.to_ascii_lowercase());
                last_was_sep = false;
            } else if !last_was_sep {
                slug.push('_');
                last_was_sep = true;
            }
        }
        let slug = slug.trim_matches(|c| c == '_' || c == '.');

        let digest = hex::encode(Sha256::digest(self.uri.as_bytes()));
        if slug.is_empty() {
            format!("{}-{}", self.scheme, &digest[..8])
        } else {
            format!("{slug}-{}", &digest[..8])
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
