//! MiningDutch adapter (§4.4.3)
//!
//! The pool's API answers under a per-coin/algo PHP script and the payload
//! shape is not consistent across scripts, so parsing works against the
//! generic JSON value tree instead of a single fixed struct.

use async_trait::async_trait;
use log::trace;
use serde_json::Value;
use std::time::Duration;
use uptimekeeper_core::WorkerObservation;
use uptimekeeper_http::{HttpClient, HttpError};

use crate::{
    debug_gate, AdapterOutcome, Credentials, FailReason, PoolAdapter, RequiredCredentials,
};

const TIMEOUT: Duration = Duration::from_secs(15);
const DEFAULT_BASE: &str = "https://www.mining-dutch.nl";

fn algo_for_coin(coin: &str) -> Option<&'static str> {
    match coin.to_uppercase().as_str() {
        "BTC" => Some("sha256"),
        "LTC" | "DOGE" => Some("scrypt"),
        _ => None,
    }
}

fn opposite_algo(algo: &str) -> &'static str {
    match algo {
        "sha256" => "scrypt",
        "scrypt" => "sha256",
        other => unreachable!("unexpected algo {other}"),
    }
}

fn coin_slug(coin: &str) -> Option<&'static str> {
    match coin.to_uppercase().as_str() {
        "BTC" => Some("bitcoin"),
        "LTC" => Some("litecoin"),
        "DOGE" => Some("dogecoin"),
        _ => None,
    }
}

pub struct MiningDutchAdapter {
    http: HttpClient,
    base_url: String,
}

impl MiningDutchAdapter {
    pub fn new() -> Self {
        MiningDutchAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: DEFAULT_BASE.to_string(),
        }
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        MiningDutchAdapter {
            http: HttpClient::new(TIMEOUT),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, slug: &str, account: &str, api_key: &str) -> String {
        format!(
            "{}/pools/{}.php?page=api&action=getuserworkers&id={}&api_key={}",
            self.base_url, slug, account, api_key
        )
    }

    async fn try_slug(&self, slug: &str, account: &str, api_key: &str) -> AdapterOutcome {
        let endpoint = self.endpoint(slug, account, api_key);
        let raw = match self.http.get(&endpoint, &[]).await {
            Ok(r) => r,
            Err(HttpError::Http {
                status,
                body_prefix,
                ..
            }) => return AdapterOutcome::fail(FailReason::Http(status), endpoint, body_prefix),
            Err(e) => return AdapterOutcome::fail(FailReason::Transport, endpoint, e.to_string()),
        };

        if debug_gate("miningdutch") {
            trace!("miningdutch raw response for {endpoint}: {}", raw.body);
        }

        let value: Value = match serde_json::from_str(&raw.body) {
            Ok(v) => v,
            Err(e) => return AdapterOutcome::fail(FailReason::Schema, endpoint, e.to_string()),
        };

        match extract_entries(&value) {
            Some(workers) => AdapterOutcome::Ok { workers, endpoint },
            None => AdapterOutcome::fail(
                FailReason::Schema,
                endpoint,
                "unrecognised envelope shape".to_string(),
            ),
        }
    }
}

impl Default for MiningDutchAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Tries, in order: `{getuserworkers:{data:{miners|workers}}}`,
/// `{data:{workers}}`, `{workers}`, `{data}`.
fn extract_entries(root: &Value) -> Option<Vec<WorkerObservation>> {
    let candidates = [
        root.get("getuserworkers")
            .and_then(|v| v.get("data"))
            .and_then(|d| d.get("miners").or_else(|| d.get("workers"))),
        root.get("data").and_then(|d| d.get("workers")),
        root.get("workers"),
        root.get("data"),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Some(entries) = parse_entries_container(candidate) {
            return Some(entries);
        }
    }
    None
}

fn parse_entries_container(container: &Value) -> Option<Vec<WorkerObservation>> {
    match container {
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                out.push(parse_one_entry(None, item)?);
            }
            Some(out)
        }
        Value::Object(map) => {
            let mut out = Vec::new();
            for (key, item) in map {
                out.push(parse_one_entry(Some(key), item)?);
            }
            Some(out)
        }
        _ => None,
    }
}

fn parse_one_entry(key: Option<&str>, item: &Value) -> Option<WorkerObservation> {
    let name = item
        .get("worker")
        .or_else(|| item.get("name"))
        .or_else(|| item.get("username"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .or_else(|| key.map(|k| k.to_string()))?;

    let hashrate = item
        .get("hashrate")
        .or_else(|| item.get("hash_rate"))
        .and_then(value_as_f64)
        .unwrap_or(0.0);

    let alive_hint = item.get("alive").and_then(value_as_f64);

    let status_text = item
        .get("status")
        .or_else(|| item.get("worker_status"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Some(WorkerObservation {
        name,
        hashrate,
        alive_hint,
        status_text,
        last_share_ms: None,
    })
}

fn value_as_f64(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.parse::<f64>().ok()))
}

#[async_trait]
impl PoolAdapter for MiningDutchAdapter {
    fn pool_name(&self) -> &'static str {
        "miningdutch"
    }

    fn required_credentials(&self) -> RequiredCredentials {
        RequiredCredentials::ApiKeyOnly
    }

    async fn list_workers(&self, account: &str, coin: &str, creds: &Credentials) -> AdapterOutcome {
        let mut tried = Vec::new();

        if let Some(algo) = algo_for_coin(coin) {
            tried.push(algo.to_string());
        }
        if let Some(slug) = coin_slug(coin) {
            tried.push(slug.to_string());
        }
        if let Some(algo) = algo_for_coin(coin) {
            tried.push(opposite_algo(algo).to_string());
        }
        if tried.is_empty() {
            tried.push(coin.to_lowercase());
        }

        let mut last = None;
        for slug in &tried {
            let outcome = self.try_slug(slug, account, &creds.api_key).await;
            if outcome.is_ok() {
                return outcome;
            }
            last = Some(outcome);
        }
        last.expect("tried at least one slug")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_getuserworkers_array_shape() {
        let v = serde_json::json!({
            "getuserworkers": {"data": {"miners": [
                {"worker": "w1", "hashrate": 10.0, "alive": 1}
            ]}}
        });
        let entries = extract_entries(&v).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "w1");
    }

    #[test]
    fn parses_data_workers_map_shape() {
        let v = serde_json::json!({
            "data": {"workers": {"w2": {"hashrate": 0, "status": "active"}}}
        });
        let entries = extract_entries(&v).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "w2");
        assert_eq!(entries[0].status_text.as_deref(), Some("active"));
    }

    #[test]
    fn parses_bare_workers_shape() {
        let v = serde_json::json!({"workers": [{"username": "w3", "hash_rate": "5.5"}]});
        let entries = extract_entries(&v).unwrap();
        assert_eq!(entries[0].hashrate, 5.5);
    }

    #[test]
    fn parses_bare_data_shape() {
        let v = serde_json::json!({"data": [{"name": "w4", "hashrate": 1.0}]});
        let entries = extract_entries(&v).unwrap();
        assert_eq!(entries[0].name, "w4");
    }

    #[test]
    fn unrecognised_shape_yields_none() {
        let v = serde_json::json!({"unexpected": 1});
        assert!(extract_entries(&v).is_none());
    }

    #[test]
    fn algo_and_slug_mappings_match_spec() {
        assert_eq!(algo_for_coin("BTC"), Some("sha256"));
        assert_eq!(algo_for_coin("LTC"), Some("scrypt"));
        assert_eq!(algo_for_coin("DOGE"), Some("scrypt"));
        assert_eq!(coin_slug("BTC"), Some("bitcoin"));
        assert_eq!(coin_slug("LTC"), Some("litecoin"));
        assert_eq!(coin_slug("DOGE"), Some("dogecoin"));
        assert_eq!(opposite_algo("sha256"), "scrypt");
        assert_eq!(opposite_algo("scrypt"), "sha256");
    }
}
