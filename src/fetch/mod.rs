//! Protocol-polymorphic fetching.
//!
//! This module defines the [`Fetcher`] trait, the [`FetchOptions`] applied to
//! every attempt, and the [`FetcherRegistry`] that maps a source's scheme to
//! the fetcher handling it.  Concrete fetchers live in sub-modules
//! ([`http`] and [`file`]).
//!
//! ## For contributors: adding a new protocol
//!
//! 1. Create a new file in this directory (e.g. `s3.rs`).
//! 2. Define a struct and implement [`Fetcher`] for it.  Perform exactly one
//!    retrieval per call, honour [`Attempt::token`], and never write to
//!    storage or log above `debug`.
//! 3. Register it for its scheme in [`FetcherRegistry::with_defaults`].
//!
//! The scheduler and the store are protocol-agnostic and need no changes.

mod file;
mod http;
mod source;

pub use file::FileFetcher;
pub use http::HttpFetcher;
pub use source::Source;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderValue;

use crate::error::{FetchError, OptionError};
use crate::request::Attempt;

/// One retrieval of a source, bound to a cancellable attempt.
///
/// Implementations must be [`Send`] + [`Sync`]: the registry shares them
/// behind an [`Arc`] and the scheduler calls them from a tokio task.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Short label used in debug output.
    fn name(&self) -> &str;

    /// Retrieve `source` once and return its full body.
    ///
    /// Must return promptly with [`FetchError::Cancelled`] once the attempt's
    /// token is cancelled.  Must not retry.
    async fn fetch(
        &self,
        attempt: &Attempt,
        source: &Source,
        options: &FetchOptions,
    ) -> Result<Vec<u8>, FetchError>;
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Validated request options, applied in a fixed order: user agent,
/// correlation id, timeout.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    user_agent: HeaderValue,
    request_id: HeaderValue,
    timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn builder() -> FetchOptionsBuilder {
        FetchOptionsBuilder::default()
    }

    pub fn user_agent(&self) -> &HeaderValue {
        &self.user_agent
    }

    pub fn request_id(&self) -> &HeaderValue {
        &self.request_id
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Collects options and validates all of them at once in [`build`].
///
/// [`build`]: FetchOptionsBuilder::build
#[derive(Debug, Default, Clone)]
pub struct FetchOptionsBuilder {
    user_agent: Option<String>,
    request_id: Option<String>,
    timeout: Option<Duration>,
}

impl FetchOptionsBuilder {
    pub fn user_agent(mut self, value: impl Into<String>) -> Self {
        self.user_agent = Some(value.into());
        self
    }

    /// Use the application name and attempt identity for both the user agent
    /// and the correlation header.
    pub fn attempt(mut self, attempt: &Attempt) -> Self {
        self.user_agent = Some(user_agent_for(attempt.app_name()));
        self.request_id = Some(attempt.header_value());
        self
    }

    pub fn request_id(mut self, value: impl Into<String>) -> Self {
        self.request_id = Some(value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn build(self) -> Result<FetchOptions, OptionError> {
        let user_agent = header("user-agent", self.user_agent)?;
        let request_id = header("request-id", self.request_id)?;
        Ok(FetchOptions {
            user_agent,
            request_id,
            timeout: self.timeout,
        })
    }
}

/// `User-Agent` sent on behalf of `app_name`.
pub fn user_agent_for(app_name: &str) -> String {
    format!("{app_name} ({}/{})", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"))
}

fn header(name: &'static str, value: Option<String>) -> Result<HeaderValue, OptionError> {
    let value = value.unwrap_or_default();
    if value.trim().is_empty() {
        return Err(OptionError::Empty(name));
    }
    HeaderValue::from_str(&value).map_err(|_| OptionError::InvalidHeader { name, value })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Maps a lowercase scheme (`"https"`) to the fetcher that serves it.
#[derive(Clone, Default)]
pub struct FetcherRegistry {
    fetchers: BTreeMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `http`, `https` (sharing one pooled client) and `file`.
    pub fn with_defaults() -> Result<Self, FetchError> {
        let http: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new()?);
        let mut registry = Self::new();
        registry.register("http", Arc::clone(&http));
        registry.register("https", http);
        registry.register("file", Arc::new(FileFetcher));
        Ok(registry)
    }

    /// Register `fetcher` for `scheme`, replacing any previous handler.
    pub fn register(&mut self, scheme: &str, fetcher: Arc<dyn Fetcher>) {
        self.fetchers.insert(scheme.to_ascii_lowercase(), fetcher);
    }

    /// Supported prefixes, e.g. `"file://, http://, https://"`.
    pub fn supported(&self) -> String {
        self.fetchers
            .keys()
            .map(|scheme| format!("{scheme}://"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Parse `uri` and check that some fetcher handles its scheme.
    pub fn parse(&self, uri: &str) -> Result<Source, FetchError> {
        let source = Source::parse(uri, &self.supported())?;
        self.lookup(&source)?;
        Ok(source)
    }

    /// Dispatch one attempt to the fetcher registered for `source`.
    ///
    /// An unknown scheme fails before any I/O happens.
    pub async fn fetch(
        &self,
        attempt: &Attempt,
        source: &Source,
        options: &FetchOptions,
    ) -> Result<Vec<u8>, FetchError> {
        let fetcher = self.lookup(source)?;
        tracing::debug!(
            fetcher = fetcher.name(),
            source = %source,
            request_id = %attempt.id(),
            "dispatching fetch"
        );
        fetcher.fetch(attempt, source, options).await
    }

    fn lookup(&self, source: &Source) -> Result<&Arc<dyn Fetcher>, FetchError> {
        self.fetchers
            .get(source.scheme())
            .ok_or_else(|| FetchError::UnsupportedProtocol {
                uri: source.as_str().to_string(),
                supported: self.supported(),
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
