//! F2Pool adapter (§4.4.4)
//!
//! F2Pool signs every request with a static per-account secret rather than
//! HMAC, and reports `code == 0` as the logical success marker even on an
//! HTTP 200 — a non-zero code is treated the same as a transport failure.

use async_trait::async_trait;
use log::trace;
use serde::Deserialize;
use std::time::Duration;
use uptimekeeper_core::WorkerObservation;
use uptimekeeper_http::{parse_json, HttpClient, HttpError};

use crate::{
    debug_gate, AdapterOutcome, Credentials, FailReason, PoolAdapter, RequiredCredentials,
};

const TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_BASE: &str = "https://api.f2pool.com";

fn coin_path_slug(coin: &str) -> String {
    match coin.to_uppercase().as_str() {
        "BTC" => "bitcoin".to_string(),
        "BCH" => "bitcoin-cash".to_string(),
        "BSV" => "bitcoin-sv".to_string(),
        "LTC" => "litecoin".to_string(),
        "KAS" => "kaspa".to_string(),
        "CFX" => "conflux".to_string(),
        "ETC" => "ethereum-classic".to_string(),
        "DASH" => "dash".to_string(),
        "SC" => "sia".to_string(),
        _ => coin.to_lowercase(),
    }
}

pub struct F2PoolAdapter {
    http: HttpClient,
    base_url: String,
}

impl F2PoolAdapter {
    pub fn new() -> Self {
        F2PoolAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: DEFAULT_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        F2PoolAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: base_url.into(),
        }
    }
}

impl Default for F2PoolAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<EnvelopeData>,
}

#[derive(Debug, Deserialize)]
struct EnvelopeData {
    #[serde(default)]
    workers: Option<Vec<WorkerEntry>>,
}

#[derive(Debug, Deserialize)]
struct WorkerEntry {
    worker_name: String,
    #[serde(default)]
    hash_rate_info: Option<HashRateInfo>,
    #[serde(default)]
    last_share_at: Option<i64>,
    #[serde(default)]
    status: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct HashRateInfo {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    hash_rate: f64,
}

/// F2Pool reports `last_share_at` in seconds for most accounts but some
/// older ones still emit milliseconds; anything below this threshold is
/// assumed to be seconds and scaled up.
const MS_EPOCH_THRESHOLD: i64 = 100_000_000_000;

fn normalise_last_share_ms(raw: i64) -> i64 {
    if raw <= 0 {
        return 0;
    }
    if raw < MS_EPOCH_THRESHOLD {
        raw * 1000
    } else {
        raw
    }
}

#[async_trait]
impl PoolAdapter for F2PoolAdapter {
    fn pool_name(&self) -> &'static str {
        "f2pool"
    }

    fn required_credentials(&self) -> RequiredCredentials {
        RequiredCredentials::ApiKeyOnly
    }

    async fn list_workers(&self, account: &str, coin: &str, creds: &Credentials) -> AdapterOutcome {
        let endpoint = format!("{}/v2/hash_rate/worker/list", self.base_url);
        let body = serde_json::json!({
            "currency": coin_path_slug(coin),
            "mining_user_name": account,
            "page": 1,
            "size": 200,
        });

        let raw = match self
            .http
            .post_json(
                &endpoint,
                &[("F2P-API-SECRET", creds.api_key.as_str())],
                &body,
            )
            .await
        {
            Ok(r) => r,
            Err(HttpError::Http {
                status,
                body_prefix,
                ..
            }) => return AdapterOutcome::fail(FailReason::Http(status), endpoint, body_prefix),
            Err(e) => return AdapterOutcome::fail(FailReason::Transport, endpoint, e.to_string()),
        };

        if debug_gate("f2pool") {
            trace!("f2pool raw response for {endpoint}: {}", raw.body);
        }

        let envelope: Envelope = match parse_json(&raw.body) {
            Ok(v) => v,
            Err(e) => return AdapterOutcome::fail(FailReason::Schema, endpoint, e.to_string()),
        };

        if envelope.code != 0 {
            let diag = envelope
                .message
                .unwrap_or_else(|| format!("code={}", envelope.code));
            return AdapterOutcome::fail(
                FailReason::Logical(envelope.code.to_string()),
                endpoint,
                diag,
            );
        }

        let entries = match envelope.data.and_then(|d| d.workers) {
            Some(entries) => entries,
            None => {
                return AdapterOutcome::fail(
                    FailReason::Schema,
                    endpoint,
                    "missing data.workers array".to_string(),
                )
            }
        };

        let workers = entries
            .into_iter()
            .map(|e| {
                let hash_rate_info = e.hash_rate_info.unwrap_or_default();
                let hashrate = hash_rate_info.hash_rate;
                let name = hash_rate_info
                    .name
                    .filter(|n| !n.is_empty())
                    .unwrap_or(e.worker_name);
                let last_share_ms = e.last_share_at.map(normalise_last_share_ms);
                // F2Pool's explicit status code 1 only forces offline when
                // the pool also reports zero hashrate; a non-zero hashrate
                // with a stale status code still counts as hashing.
                let status_text = match (e.status, hashrate) {
                    (Some(1), h) if h <= 0.0 => Some("offline".to_string()),
                    _ => None,
                };
                WorkerObservation {
                    name,
                    hashrate,
                    alive_hint: None,
                    status_text,
                    last_share_ms,
                }
            })
            .collect();

        AdapterOutcome::Ok { workers, endpoint }
    }
}
