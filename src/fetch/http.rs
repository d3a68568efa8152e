//! HTTP/HTTPS fetcher.
//!
//! Uses a single pooled [`reqwest::Client`] for every attempt.  Each call is
//! one `GET` with no retries; the scheduler's interval is the retry policy.

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::Client;

use super::{FetchOptions, Fetcher, Source};
use crate::error::FetchError;
use crate::request::{Attempt, REQUEST_ID_HEADER};

/// Most body bytes kept in a [`FetchError::HttpStatus`] snippet.
const SNIPPET_LIMIT: usize = 512;

/// Fetches `http://` and `https://` sources with `GET`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder().build().map_err(FetchError::Network)?;
        Ok(Self { client })
    }

    async fn get(&self, source: &Source, options: &FetchOptions) -> Result<Vec<u8>, FetchError> {
        // Options go on in a fixed order; they were validated when built.
        let mut request = self
            .client
            .get(source.as_str())
            .header(USER_AGENT, options.user_agent().clone())
            .header(REQUEST_ID_HEADER, options.request_id().clone());
        if let Some(timeout) = options.timeout() {
            request = request.timeout(timeout);
        }

        let mut response = request.send().await.map_err(FetchError::Network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                snippet: snippet(&mut response).await,
            });
        }

        let body = response.bytes().await.map_err(FetchError::Network)?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn name(&self) -> &str {
        "http"
    }

    async fn fetch(
        &self,
        attempt: &Attempt,
        source: &Source,
        options: &FetchOptions,
    ) -> Result<Vec<u8>, FetchError> {
        tokio::select! {
            biased;
            _ = attempt.token().cancelled() => Err(FetchError::Cancelled),
            result = self.get(source, options) => result,
        }
    }
}

/// Lossy UTF-8 of at most [`SNIPPET_LIMIT`] bytes of an error body.
///
/// Reads no further than the limit.  A body that fails mid-read keeps
/// whatever arrived; the status is the error being reported.
async fn snippet(response: &mut reqwest::Response) -> String {
    let mut head = Vec::with_capacity(SNIPPET_LIMIT);
    while head.len() < SNIPPET_LIMIT {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(SNIPPET_LIMIT - head.len());
                head.extend_from_slice(&chunk[..take]);
            }
            Ok(None) | Err(_) => break,
        }
    }
    String::from_utf8_lossy(&head).into_owned()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::Matcher;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::fetch::FetcherRegistry;

    fn setup(app: &str) -> (Attempt, FetchOptions) {
        let attempt = Attempt::new(app, &CancellationToken::new());
        let options = FetchOptions::builder().attempt(&attempt).build().unwrap();
        (attempt, options)
    }

    fn source(url: &str) -> Source {
        Source::parse(url, "http://, https://").unwrap()
    }

    #[tokio::test]
    async fn returns_body_verbatim() {
        let mut server = mockito::Server::new_async().await;
        let body: Vec<u8> = (0u8..=255).collect();
        let mock = server
            .mock("GET", "/data")
            .with_status(200)
            .with_body(body.clone())
            .create_async()
            .await;

        let (attempt, options) = setup("app");
        let fetched = HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("{}/data", server.url())), &options)
            .await
            .unwrap();

        assert_eq!(fetched, body);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_user_agent_and_request_id() {
        let mut server = mockito::Server::new_async().await;
        let (attempt, options) = setup("weather");
        let mock = server
            .mock("GET", "/data")
            .match_header("user-agent", Matcher::Regex("^weather \\(collector/".into()))
            .match_header("x-request-id", attempt.header_value().as_str())
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("{}/data", server.url())), &options)
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_carries_bounded_snippet() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/missing")
            .with_status(404)
            .with_body("x".repeat(4096))
            .create_async()
            .await;

        let (attempt, options) = setup("app");
        let err = HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("{}/missing", server.url())), &options)
            .await
            .unwrap_err();

        match err {
            FetchError::HttpStatus { status, snippet } => {
                assert_eq!(status, 404);
                assert_eq!(snippet.len(), SNIPPET_LIMIT);
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connection_refused_is_network_error() {
        // Bind then drop a listener so the port is very likely closed.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let (attempt, options) = setup("app");
        let err = HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("http://127.0.0.1:{port}/")), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Network(_)), "{err:?}");
    }

    #[tokio::test]
    async fn cancelled_attempt_makes_no_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", "/data").expect(0).create_async().await;

        let (attempt, options) = setup("app");
        attempt.token().cancel();
        let err = HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("{}/data", server.url())), &options)
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Cancelled));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_body_cut_short_still_reports_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Promise a long body, send a few bytes, then hang up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 100000\r\n\r\nbusy")
                .await
                .unwrap();
        });

        let (attempt, options) = setup("app");
        let err = HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("http://{addr}/")), &options)
            .await
            .unwrap_err();

        match err {
            FetchError::HttpStatus { status, snippet } => {
                assert_eq!(status, 503);
                assert!(snippet.starts_with("busy"), "{snippet:?}");
            }
            other => panic!("expected HttpStatus, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancelling_mid_flight_returns_promptly() {
        // Accept the connection but never answer.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let (attempt, options) = setup("app");
        let token = attempt.token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let fetcher = HttpFetcher::new().unwrap();
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            fetcher.fetch(&attempt, &source(&format!("http://{addr}/")), &options),
        )
        .await
        .expect("cancellation did not stop the fetch");

        assert!(matches!(result, Err(FetchError::Cancelled)), "{result:?}");
    }

    #[tokio::test]
    async fn timeout_surfaces_as_network_error() {
        // Accept the connection but never answer.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let attempt = Attempt::new("app", &CancellationToken::new());
        let options = FetchOptions::builder()
            .attempt(&attempt)
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let err = HttpFetcher::new()
            .unwrap()
            .fetch(&attempt, &source(&format!("http://{addr}/")), &options)
            .await
            .unwrap_err();

        match err {
            FetchError::Network(e) => assert!(e.is_timeout(), "{e}"),
            other => panic!("expected Network timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsupported_prefix_never_reaches_the_server() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("GET", Matcher::Any).expect(0).create_async().await;

        let registry = FetcherRegistry::with_defaults().unwrap();
        let url = format!("{}/data", server.url()).replacen("http://", "gopher://", 1);

        assert!(matches!(
            registry.parse(&url),
            Err(FetchError::UnsupportedProtocol { .. })
        ));
        mock.assert_async().await;
    }
}
