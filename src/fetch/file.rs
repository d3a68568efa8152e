//! Local file fetcher for `file:///absolute/path` sources.
//!
//! Handy for testing a deployment against a fixture, and a second worked
//! example of the [`Fetcher`] trait next to [`super::HttpFetcher`].

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;

use super::{FetchOptions, Fetcher, Source};
use crate::error::FetchError;
use crate::request::Attempt;

#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    fn path(source: &Source) -> PathBuf {
        // `file:///etc/x` -> `/etc/x`; `file://localhost/etc/x` -> `/etc/x`.
        let rest = source.rest();
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        PathBuf::from(rest)
    }
}

#[async_trait]
impl Fetcher for FileFetcher {
    fn name(&self) -> &str {
        "file"
    }

    async fn fetch(
        &self,
        attempt: &Attempt,
        source: &Source,
        options: &FetchOptions,
    ) -> Result<Vec<u8>, FetchError> {
        let path = Self::path(source);
        let read = async {
            match options.timeout() {
                Some(timeout) => tokio::time::timeout(timeout, tokio::fs::read(&path))
                    .await
                    .unwrap_or_else(|_| Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))),
                None => tokio::fs::read(&path).await,
            }
        };

        tokio::select! {
            biased;
            _ = attempt.token().cancelled() => Err(FetchError::Cancelled),
            result = read => result.map_err(|source| FetchError::Io { path: path.clone(), source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_util::sync::CancellationToken;

    use super::*;

    fn setup() -> (Attempt, FetchOptions) {
        let attempt = Attempt::new("app", &CancellationToken::new());
        let options = FetchOptions::builder().attempt(&attempt).build().unwrap();
        (attempt, options)
    }

    fn file_source(path: &std::path::Path) -> Source {
        Source::parse(&format!("file://{}", path.display()), "file://").unwrap()
    }

    #[tokio::test]
    async fn reads_file_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload.json");
        std::fs::write(&path, b"{\"v\":1}").unwrap();

        let (attempt, options) = setup();
        let body = FileFetcher.fetch(&attempt, &file_source(&path), &options).await.unwrap();
        assert_eq!(body, b"{\"v\":1}");
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope");

        let (attempt, options) = setup();
        let err = FileFetcher
            .fetch(&attempt, &file_source(&path), &options)
            .await
            .unwrap_err();

        match err {
            FetchError::Io { path: p, source } => {
                assert_eq!(p, path);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("expected Io, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn honours_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        std::fs::write(&path, b"data").unwrap();

        let (attempt, options) = setup();
        attempt.token().cancel();
        let err = FileFetcher
            .fetch(&attempt, &file_source(&path), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Cancelled));
    }

    #[test]
    fn localhost_authority_is_stripped() {
        let src = Source::parse("file://localhost/etc/hosts", "file://").unwrap();
        assert_eq!(FileFetcher::path(&src), PathBuf::from("/etc/hosts"));
    }
}
