//! HTTP Client
//!
//! The transport every pool adapter is built on: a single timeout per call,
//! at most one retry on connect/abort errors and on a fixed set of status
//! codes, `Retry-After` honoured when present, IPv4-preferred resolution,
//! and a structured outcome (never a raised exception) carrying the status,
//! a bounded body prefix and the elapsed time for diagnostics.

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use log::{debug, warn};
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Status codes worth retrying once: rate limiting, transient auth hiccups
/// on some pools, and 5xx.
fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 401 | 403 | 429 | 451 | 500..=599)
}

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http error {status}: {body_prefix}")]
    Http {
        status: u16,
        body_prefix: String,
        elapsed_ms: u64,
    },
    #[error("schema error: {0}")]
    Schema(String),
}

/// Captured outcome of an HTTP call, for adapters that need the raw body
/// and timing even on success (diagnostics) as well as on failure.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub body: String,
    pub elapsed_ms: u64,
}

pub struct HttpClient {
    client: Client,
    timeout: Duration,
}

impl HttpClient {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .local_address(Some(IpAddr::V4(Ipv4Addr::UNSPECIFIED)))
            .build()
            .expect("failed to build HTTP client");
        HttpClient { client, timeout }
    }

    /// GET with up to one retry, returning the raw captured response. The
    /// caller (an adapter) decides how to parse the body and whether a
    /// non-2xx or unparseable body is fatal for its group.
    pub async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<RawResponse, HttpError> {
        self.call(Method::GET, url, headers, None).await
    }

    /// POST a JSON body with up to one retry.
    pub async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &serde_json::Value,
    ) -> Result<RawResponse, HttpError> {
        self.call(Method::POST, url, headers, Some(body.clone()))
            .await
    }

    async fn call(
        &self,
        method: Method,
        url: &str,
        headers: &[(&str, &str)],
        body: Option<serde_json::Value>,
    ) -> Result<RawResponse, HttpError> {
        let mut attempt: u32 = 0;
        loop {
            let start = Instant::now();
            let mut req = self.client.request(method.clone(), url);
            for (k, v) in headers {
                req = req.header(*k, *v);
            }
            if let Some(b) = &body {
                req = req.json(b);
            }

            let result = req.send().await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            match result {
                Err(e) => {
                    if attempt >= 1 {
                        return Err(HttpError::Transport(e.to_string()));
                    }
                    debug!("transport error calling {}, retrying: {}", url, e);
                    self.backoff(attempt, None).await;
                    attempt += 1;
                    continue;
                }
                Ok(resp) => {
                    let status = resp.status();
                    let retry_after = retry_after_seconds(resp.headers());
                    let text = resp.text().await.unwrap_or_default();

                    if status.is_success() {
                        return Ok(RawResponse {
                            status,
                            body: text,
                            elapsed_ms,
                        });
                    }

                    if is_retryable_status(status) && attempt < 1 {
                        warn!("retryable status {} from {}, retrying", status, url);
                        self.backoff(attempt, retry_after).await;
                        attempt += 1;
                        continue;
                    }

                    let body_prefix = text.chars().take(300).collect::<String>();
                    return Err(HttpError::Http {
                        status: status.as_u16(),
                        body_prefix,
                        elapsed_ms,
                    });
                }
            }
        }
    }

    async fn backoff(&self, attempt: u32, retry_after: Option<u64>) {
        let delay = if let Some(secs) = retry_after {
            Duration::from_secs(secs)
        } else {
            let base_ms = 300u64 * (attempt as u64 + 1);
            let jitter_ms: u64 = rand::thread_rng().gen_range(0..300);
            Duration::from_millis(base_ms + jitter_ms)
        };
        tokio::time::sleep(delay.min(self.timeout)).await;
    }
}

fn retry_after_seconds(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Parse a JSON body, mapping failures to `HttpError::Schema` rather than
/// panicking — callers treat this as an adapter-level schema failure.
pub fn parse_json<T: DeserializeOwned>(body: &str) -> Result<T, HttpError> {
    serde_json::from_str(body).map_err(|e| HttpError::Schema(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn get_returns_captured_response_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let resp = client
            .get(&format!("{}/ok", server.uri()), &[])
            .await
            .unwrap();
        assert_eq!(resp.status, StatusCode::OK);
        assert_eq!(resp.body, "hello");
    }

    #[tokio::test]
    async fn retries_once_on_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let resp = client
            .get(&format!("{}/flaky", server.uri()), &[])
            .await
            .unwrap();
        assert_eq!(resp.body, "recovered");
    }

    #[tokio::test]
    async fn gives_up_after_one_retry_on_persistent_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let err = client
            .get(&format!("{}/down", server.uri()), &[])
            .await
            .unwrap_err();
        match err {
            HttpError::Http { status, .. } => assert_eq!(status, 503),
            other => panic!("expected Http error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_4xx_fails_immediately() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bad"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(Duration::from_secs(5));
        let err = client
            .get(&format!("{}/bad", server.uri()), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::Http { status: 404, .. }));
    }
}
