//! LiteCoinPool adapter (§4.4.2)

use async_trait::async_trait;
use log::trace;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use uptimekeeper_core::WorkerObservation;
use uptimekeeper_http::{parse_json, HttpClient, HttpError};

use crate::{
    debug_gate, AdapterOutcome, Credentials, FailReason, MatchStrategy, PoolAdapter,
    RequiredCredentials,
};

const TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_BASE: &str = "https://www.litecoinpool.org";

pub struct LiteCoinPoolAdapter {
    http: HttpClient,
    base_url: String,
}

impl LiteCoinPoolAdapter {
    pub fn new() -> Self {
        LiteCoinPoolAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: DEFAULT_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        LiteCoinPoolAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: base_url.into(),
        }
    }
}

impl Default for LiteCoinPoolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    workers: Option<HashMap<String, WorkerEntry>>,
}

#[derive(Debug, Deserialize)]
struct WorkerEntry {
    #[serde(default)]
    connected: bool,
    #[serde(default)]
    hash_rate: f64,
}

#[async_trait]
impl PoolAdapter for LiteCoinPoolAdapter {
    fn pool_name(&self) -> &'static str {
        "litecoinpool"
    }

    fn required_credentials(&self) -> RequiredCredentials {
        RequiredCredentials::ApiKeyOnly
    }

    // LiteCoinPool's worker map is keyed by the account's full dotted
    // `worker_name`, so an exact match is possible and preferred; only
    // miners whose stored name drifted from what the pool reports need the
    // tail fallback the other adapters rely on exclusively.
    fn match_strategy(&self) -> MatchStrategy {
        MatchStrategy::ExactThenTail
    }

    async fn list_workers(
        &self,
        _account: &str,
        _coin: &str,
        creds: &Credentials,
    ) -> AdapterOutcome {
        let endpoint = format!("{}/api?api_key={}", self.base_url, creds.api_key);

        let raw = match self.http.get(&endpoint, &[]).await {
            Ok(r) => r,
            Err(HttpError::Http {
                status,
                body_prefix,
                ..
            }) => return AdapterOutcome::fail(FailReason::Http(status), endpoint, body_prefix),
            Err(e) => return AdapterOutcome::fail(FailReason::Transport, endpoint, e.to_string()),
        };

        if debug_gate("litecoinpool") {
            trace!("litecoinpool raw response for {endpoint}: {}", raw.body);
        }

        let parsed: ApiResponse = match parse_json(&raw.body) {
            Ok(v) => v,
            Err(e) => return AdapterOutcome::fail(FailReason::Schema, endpoint, e.to_string()),
        };

        let entries = match parsed.workers {
            Some(entries) => entries,
            None => {
                return AdapterOutcome::fail(
                    FailReason::Schema,
                    endpoint,
                    "missing workers map".to_string(),
                )
            }
        };

        let workers = entries
            .into_iter()
            .map(|(fullname, w)| WorkerObservation {
                name: fullname,
                hashrate: w.hash_rate * 1000.0,
                alive_hint: Some(if w.connected { 1.0 } else { 0.0 }),
                status_text: None,
                last_share_ms: None,
            })
            .collect();

        AdapterOutcome::Ok { workers, endpoint }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn normalises_khs_to_hs_and_maps_connected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "workers": {
                    "acct.worker001": {"connected": true, "hash_rate": 12.5},
                    "acct.worker002": {"connected": false, "hash_rate": 0.0}
                }
            })))
            .mount(&server)
            .await;

        let adapter = LiteCoinPoolAdapter::with_base_url(server.uri());
        let creds = Credentials {
            api_key: "k".to_string(),
            secret_key: None,
        };
        let outcome = adapter.list_workers("acct", "LTC", &creds).await;
        match outcome {
            AdapterOutcome::Ok { workers, .. } => {
                assert_eq!(workers.len(), 2);
                let w1 = workers.iter().find(|w| w.name == "acct.worker001").unwrap();
                assert_eq!(w1.hashrate, 12500.0);
                assert_eq!(w1.alive_hint, Some(1.0));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_workers_key_is_schema_fail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"foo": 1})))
            .mount(&server)
            .await;

        let adapter = LiteCoinPoolAdapter::with_base_url(server.uri());
        let creds = Credentials {
            api_key: "k".to_string(),
            secret_key: None,
        };
        let outcome = adapter.list_workers("acct", "LTC", &creds).await;
        assert!(matches!(
            outcome,
            AdapterOutcome::Fail {
                reason: FailReason::Schema,
                ..
            }
        ));
    }
}
