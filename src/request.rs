//! Per-attempt request identity.
//!
//! Every fetch attempt gets its own [`RequestId`] and its own child
//! [`CancellationToken`].  The id travels explicitly: the scheduler puts it in
//! its tracing span, the fetcher puts it in the outbound `X-Request-Id`
//! header, and nothing reads it from ambient state.

use std::fmt;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Header carrying [`RequestId::header_value`] on outbound HTTP requests.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A 128-bit random identifier minted once per fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Value for the correlation header, prefixed with the application name
    /// so server-side logs show which collector sent the request.
    pub fn header_value(&self, app_name: &str) -> String {
        format!("{app_name}-{}", self.0)
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Execution context of one fetch attempt.
///
/// Dropped at the end of the attempt; never persisted.
#[derive(Debug, Clone)]
pub struct Attempt {
    id: RequestId,
    app_name: String,
    token: CancellationToken,
}

impl Attempt {
    /// Mint a fresh identity and derive a child of `parent`.
    ///
    /// Cancelling `parent` cancels the attempt; cancelling the attempt leaves
    /// `parent` alone.
    pub fn new(app_name: impl Into<String>, parent: &CancellationToken) -> Self {
        Self {
            id: RequestId::new(),
            app_name: app_name.into(),
            token: parent.child_token(),
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn header_value(&self) -> String {
        self.id.header_value(&self.app_name)
    }
}
