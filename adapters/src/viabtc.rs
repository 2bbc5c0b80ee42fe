//! ViaBTC adapter (§4.4.1)

use async_trait::async_trait;
use log::{debug, trace};
use serde::Deserialize;
use std::time::Duration;
use uptimekeeper_core::WorkerObservation;
use uptimekeeper_http::{parse_json, HttpClient, HttpError};

use crate::{
    debug_gate, AdapterOutcome, Credentials, FailReason, PoolAdapter, RequiredCredentials,
};

const TIMEOUT: Duration = Duration::from_secs(15);

const DEFAULT_BASE: &str = "https://www.viabtc.net";

pub struct ViaBtcAdapter {
    http: HttpClient,
    base_url: String,
}

impl ViaBtcAdapter {
    pub fn new() -> Self {
        ViaBtcAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: DEFAULT_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        ViaBtcAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: base_url.into(),
        }
    }
}

impl Default for ViaBtcAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    data: Option<Vec<WorkerEntry>>,
}

#[derive(Debug, Deserialize)]
struct WorkerEntry {
    worker_name: String,
    #[serde(default)]
    hashrate_10min: f64,
    #[serde(default)]
    worker_status: Option<String>,
}

#[async_trait]
impl PoolAdapter for ViaBtcAdapter {
    fn pool_name(&self) -> &'static str {
        "viabtc"
    }

    fn required_credentials(&self) -> RequiredCredentials {
        RequiredCredentials::ApiKeyOnly
    }

    async fn list_workers(
        &self,
        _account: &str,
        coin: &str,
        creds: &Credentials,
    ) -> AdapterOutcome {
        let endpoint = format!(
            "{}/res/openapi/v1/hashrate/worker?coin={}",
            self.base_url,
            coin.to_uppercase()
        );

        let raw = match self
            .http
            .get(&endpoint, &[("X-API-KEY", creds.api_key.as_str())])
            .await
        {
            Ok(r) => r,
            Err(HttpError::Http {
                status,
                body_prefix,
                ..
            }) => {
                debug!("viabtc http error {status}: {body_prefix}");
                return AdapterOutcome::fail(FailReason::Http(status), endpoint, body_prefix);
            }
            Err(e) => return AdapterOutcome::fail(FailReason::Transport, endpoint, e.to_string()),
        };

        if debug_gate("viabtc") {
            trace!("viabtc raw response for {endpoint}: {}", raw.body);
        }

        let envelope: Envelope = match parse_json(&raw.body) {
            Ok(v) => v,
            Err(e) => return AdapterOutcome::fail(FailReason::Schema, endpoint, e.to_string()),
        };

        if envelope.code != 0 {
            return AdapterOutcome::fail(
                FailReason::Logical(envelope.code.to_string()),
                endpoint,
                format!("code={}", envelope.code),
            );
        }

        let entries = match envelope.data.and_then(|d| d.data) {
            Some(entries) => entries,
            None => {
                return AdapterOutcome::fail(
                    FailReason::Schema,
                    endpoint,
                    "missing data.data array".to_string(),
                )
            }
        };

        let workers = entries
            .into_iter()
            .map(|e| WorkerObservation {
                name: e.worker_name,
                hashrate: e.hashrate_10min,
                alive_hint: None,
                status_text: e.worker_status,
                last_share_ms: None,
            })
            .collect();

        AdapterOutcome::Ok { workers, endpoint }
    }
}
