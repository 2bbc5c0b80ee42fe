//! Binance Pool adapter (§4.4.5)
//!
//! Binance's mining endpoints are hosted behind several regional aliases and
//! respond with HTTP 451 when a given host geoblocks the caller, require
//! HMAC-signed query strings, and paginate worker listings. A clock more
//! than `recvWindow` out of sync with Binance's server draws error code
//! `-1021`, which this adapter recovers from once by resyncing against
//! `/api/v3/time` and retrying.

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use log::trace;
use serde::Deserialize;
use sha2::Sha256;
use std::time::Duration;
use tokio::sync::Mutex;
use uptimekeeper_core::WorkerObservation;
use uptimekeeper_http::{parse_json, HttpClient, HttpError};

use crate::{
    current_time_ms, debug_gate, AdapterOutcome, Credentials, FailReason, PoolAdapter,
    RequiredCredentials,
};

const TIMEOUT: Duration = Duration::from_secs(15);
const RECV_WINDOW_MS: i64 = 30_000;
const PAGE_SIZE: u32 = 200;
const CLOCK_SKEW_CODE: &str = "-1021";

fn default_hosts() -> Vec<String> {
    vec![
        "https://api.binance.com".to_string(),
        "https://api1.binance.com".to_string(),
        "https://api2.binance.com".to_string(),
        "https://api3.binance.com".to_string(),
    ]
}

fn algo_for_coin(coin: &str) -> &str {
    match coin.to_uppercase().as_str() {
        "BTC" => "sha256",
        "LTC" => "scrypt",
        "KAS" | "KASPA" => "kHeavyHash",
        _ => "sha256",
    }
}

pub struct BinanceAdapter {
    http: HttpClient,
    hosts: Vec<String>,
    clock_offset_ms: Mutex<i64>,
}

impl BinanceAdapter {
    /// `base_override` is the `BINANCE_BASE` config value, if set; it is
    /// probed before the regional `api`/`api1`/`api2`/`api3` hosts, not
    /// instead of them (§4.4.5).
    pub fn new(base_override: Option<String>) -> Self {
        let mut hosts = Vec::new();
        hosts.extend(base_override);
        hosts.extend(default_hosts());
        BinanceAdapter {
            http: HttpClient::new(TIMEOUT),
            hosts,
            clock_offset_ms: Mutex::new(0),
        }
    }

    pub fn with_hosts(hosts: Vec<String>) -> Self {
        BinanceAdapter {
            http: HttpClient::new(TIMEOUT),
            hosts,
            clock_offset_ms: Mutex::new(0),
        }
    }

    fn sign(secret: &str, query: &str) -> String {
        let mut mac =
            Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn signed_get(
        &self,
        host: &str,
        path: &str,
        mut params: Vec<(String, String)>,
        creds: &Credentials,
    ) -> Result<(String, String), AdapterOutcome> {
        let secret = creds.secret_key.as_deref().unwrap_or_default();
        let offset = *self.clock_offset_ms.lock().await;
        let timestamp = current_time_ms() + offset;

        params.push(("timestamp".to_string(), timestamp.to_string()));
        params.push(("recvWindow".to_string(), RECV_WINDOW_MS.to_string()));

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        let signature = Self::sign(secret, &query);
        let endpoint = format!("{host}{path}?{query}&signature={signature}");

        let raw = match self
            .http
            .get(&endpoint, &[("X-MBX-APIKEY", creds.api_key.as_str())])
            .await
        {
            Ok(r) => r,
            Err(HttpError::Http { status: 451, .. }) => {
                return Err(AdapterOutcome::fail(
                    FailReason::Geoblocked,
                    endpoint,
                    "451 geoblocked".to_string(),
                ))
            }
            Err(HttpError::Http {
                status,
                body_prefix,
                ..
            }) => {
                return Err(AdapterOutcome::fail(
                    FailReason::Http(status),
                    endpoint,
                    body_prefix,
                ))
            }
            Err(e) => {
                return Err(AdapterOutcome::fail(
                    FailReason::Transport,
                    endpoint,
                    e.to_string(),
                ))
            }
        };

        if debug_gate("binance") {
            trace!("binance raw response for {endpoint}: {}", raw.body);
        }

        Ok((raw.body, endpoint))
    }

    async fn resync_clock(&self, host: &str) -> Result<(), AdapterOutcome> {
        let endpoint = format!("{host}/api/v3/time");
        let raw = self.http.get(&endpoint, &[]).await.map_err(|e| {
            AdapterOutcome::fail(FailReason::Transport, endpoint.clone(), e.to_string())
        })?;

        #[derive(Deserialize)]
        struct ServerTime {
            #[serde(rename = "serverTime")]
            server_time: i64,
        }
        let parsed: ServerTime = parse_json(&raw.body)
            .map_err(|e| AdapterOutcome::fail(FailReason::Schema, endpoint, e.to_string()))?;

        let mut offset = self.clock_offset_ms.lock().await;
        *offset = parsed.server_time - current_time_ms();
        Ok(())
    }

    /// Detail lookup for a single worker, used by the engine as a fallback
    /// when a known miner did not appear in a paginated listing call.
    async fn fetch_worker_detail(
        &self,
        account: &str,
        coin: &str,
        worker_name: &str,
        creds: &Credentials,
    ) -> AdapterOutcome {
        for host in &self.hosts {
            let params = vec![
                ("algo".to_string(), algo_for_coin(coin).to_string()),
                ("userName".to_string(), account.to_string()),
                ("workerName".to_string(), worker_name.to_string()),
            ];
            let (body, endpoint) = match self
                .signed_get(host, "/sapi/v1/mining/worker/detail", params, creds)
                .await
            {
                Ok(v) => v,
                Err(outcome) => {
                    if matches!(
                        outcome,
                        AdapterOutcome::Fail {
                            reason: FailReason::Geoblocked,
                            ..
                        }
                    ) {
                        continue;
                    }
                    return outcome;
                }
            };

            return match parse_detail_response(&body, &endpoint) {
                Ok(workers) => AdapterOutcome::Ok { workers, endpoint },
                Err(outcome) => outcome,
            };
        }
        AdapterOutcome::fail(
            FailReason::Geoblocked,
            self.hosts.join(","),
            "all hosts geoblocked".to_string(),
        )
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new(None)
    }
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    code: serde_json::Value,
    #[serde(default)]
    msg: Option<String>,
    data: Option<ListData>,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(rename = "workerDatas", default)]
    worker_datas: Vec<WorkerEntry>,
    #[serde(rename = "totalNum", default)]
    total_num: u32,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    code: serde_json::Value,
    data: Option<WorkerEntry>,
}

#[derive(Debug, Deserialize)]
struct WorkerEntry {
    #[serde(rename = "workerName")]
    worker_name: String,
    #[serde(default, rename = "hashRate")]
    hash_rate: f64,
    #[serde(default)]
    status: Option<i64>,
}

fn code_is_success(code: &serde_json::Value) -> bool {
    match code {
        serde_json::Value::String(s) => s == "000000",
        serde_json::Value::Number(n) => n.as_i64() == Some(0),
        _ => false,
    }
}

fn code_is_clock_skew(code: &serde_json::Value) -> bool {
    match code {
        serde_json::Value::String(s) => s == CLOCK_SKEW_CODE,
        serde_json::Value::Number(n) => {
            n.as_i64().map(|v| v.to_string()) == Some(CLOCK_SKEW_CODE.to_string())
        }
        _ => false,
    }
}

fn to_observation(e: WorkerEntry) -> WorkerObservation {
    let status_text = match e.status {
        Some(1) => Some("active".to_string()),
        Some(_) => None,
        None => None,
    };
    WorkerObservation {
        name: e.worker_name,
        hashrate: e.hash_rate,
        alive_hint: None,
        status_text,
        last_share_ms: None,
    }
}

fn parse_detail_response(
    body: &str,
    endpoint: &str,
) -> Result<Vec<WorkerObservation>, AdapterOutcome> {
    let envelope: DetailEnvelope = parse_json(body).map_err(|e| {
        AdapterOutcome::fail(FailReason::Schema, endpoint.to_string(), e.to_string())
    })?;
    if !code_is_success(&envelope.code) {
        return Err(AdapterOutcome::fail(
            FailReason::Logical(envelope.code.to_string()),
            endpoint.to_string(),
            format!("code={}", envelope.code),
        ));
    }
    match envelope.data {
        Some(entry) => Ok(vec![to_observation(entry)]),
        None => Ok(vec![]),
    }
}

#[async_trait]
impl PoolAdapter for BinanceAdapter {
    fn pool_name(&self) -> &'static str {
        "binance"
    }

    fn required_credentials(&self) -> RequiredCredentials {
        RequiredCredentials::ApiKeyAndSecret
    }

    async fn list_workers(&self, account: &str, coin: &str, creds: &Credentials) -> AdapterOutcome {
        let mut last_fail = None;

        'hosts: for host in &self.hosts {
            let mut page_index: u32 = 1;
            let mut workers = Vec::new();
            let mut resynced = false;

            loop {
                let params = vec![
                    ("algo".to_string(), algo_for_coin(coin).to_string()),
                    ("userName".to_string(), account.to_string()),
                    ("pageIndex".to_string(), page_index.to_string()),
                    ("pageSize".to_string(), PAGE_SIZE.to_string()),
                ];

                let (body, endpoint) = match self
                    .signed_get(host, "/sapi/v1/mining/worker/list", params, creds)
                    .await
                {
                    Ok(v) => v,
                    Err(outcome) => {
                        if matches!(
                            outcome,
                            AdapterOutcome::Fail {
                                reason: FailReason::Geoblocked,
                                ..
                            }
                        ) {
                            last_fail = Some(outcome);
                            continue 'hosts;
                        }
                        last_fail = Some(outcome);
                        continue 'hosts;
                    }
                };

                let envelope: ListEnvelope = match parse_json(&body) {
                    Ok(v) => v,
                    Err(e) => {
                        last_fail = Some(AdapterOutcome::fail(
                            FailReason::Schema,
                            endpoint,
                            e.to_string(),
                        ));
                        continue 'hosts;
                    }
                };

                if !code_is_success(&envelope.code) {
                    if !resynced && code_is_clock_skew(&envelope.code) {
                        if let Err(outcome) = self.resync_clock(host).await {
                            last_fail = Some(outcome);
                            continue 'hosts;
                        }
                        resynced = true;
                        continue;
                    }
                    last_fail = Some(AdapterOutcome::fail(
                        FailReason::Logical(envelope.code.to_string()),
                        endpoint,
                        envelope.msg.unwrap_or_default(),
                    ));
                    continue 'hosts;
                }

                let data = match envelope.data {
                    Some(d) => d,
                    None => {
                        last_fail = Some(AdapterOutcome::fail(
                            FailReason::Schema,
                            endpoint,
                            "missing data".to_string(),
                        ));
                        continue 'hosts;
                    }
                };

                let page_len = data.worker_datas.len() as u32;
                workers.extend(data.worker_datas.into_iter().map(to_observation));

                if page_len < PAGE_SIZE || workers.len() as u32 >= data.total_num {
                    return AdapterOutcome::Ok { workers, endpoint };
                }
                page_index += 1;
            }
        }

        last_fail.unwrap_or_else(|| {
            AdapterOutcome::fail(
                FailReason::Geoblocked,
                self.hosts.join(","),
                "all hosts geoblocked".to_string(),
            )
        })
    }

    async fn worker_detail(
        &self,
        account: &str,
        coin: &str,
        worker_name: &str,
        creds: &Credentials,
    ) -> Option<AdapterOutcome> {
        Some(
            self.fetch_worker_detail(account, coin, worker_name, creds)
                .await,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn creds() -> Credentials {
        Credentials {
            api_key: "k".to_string(),
            secret_key: Some("s".to_string()),
        }
    }

    #[tokio::test]
    async fn single_page_below_page_size_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/mining/worker/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "000000",
                "data": {"workerDatas": [
                    {"workerName": "w1", "hashRate": 10.0, "status": 1},
                    {"workerName": "w2", "hashRate": 0.0, "status": 2}
                ], "totalNum": 2}
            })))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::with_hosts(vec![server.uri()]);
        let outcome = adapter.list_workers("acct", "BTC", &creds()).await;
        match outcome {
            AdapterOutcome::Ok { workers, .. } => {
                assert_eq!(workers.len(), 2);
                assert!(workers[0].is_online(0));
                assert!(!workers[1].is_online(0));
            }
            other => panic!("expected Ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn geoblocked_host_is_skipped_for_next_host() {
        let blocked = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(451))
            .mount(&blocked)
            .await;

        let healthy = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/mining/worker/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "000000",
                "data": {"workerDatas": [{"workerName": "w1", "hashRate": 5.0, "status": 1}], "totalNum": 1}
            })))
            .mount(&healthy)
            .await;

        let adapter = BinanceAdapter::with_hosts(vec![blocked.uri(), healthy.uri()]);
        let outcome = adapter.list_workers("acct", "BTC", &creds()).await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn clock_skew_triggers_resync_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/time"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"serverTime": 1_700_000_000_000i64})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/mining/worker/list"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"code": "-1021", "msg": "skew"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/mining/worker/list"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "000000",
                "data": {"workerDatas": [{"workerName": "w1", "hashRate": 1.0, "status": 1}], "totalNum": 1}
            })))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::with_hosts(vec![server.uri()]);
        let outcome = adapter.list_workers("acct", "BTC", &creds()).await;
        assert!(outcome.is_ok());
    }

    #[test]
    fn success_code_recognised_as_string_or_number() {
        assert!(code_is_success(&serde_json::json!("000000")));
        assert!(code_is_success(&serde_json::json!(0)));
        assert!(!code_is_success(&serde_json::json!("-1021")));
    }

    #[test]
    fn algo_mapping_covers_the_spec_table() {
        assert_eq!(algo_for_coin("BTC"), "sha256");
        assert_eq!(algo_for_coin("LTC"), "scrypt");
        assert_eq!(algo_for_coin("KAS"), "kHeavyHash");
        assert_eq!(algo_for_coin("KASPA"), "kHeavyHash");
        assert_eq!(algo_for_coin("ETH"), "sha256");
    }

    #[test]
    fn base_override_is_probed_before_the_regional_hosts() {
        let adapter = BinanceAdapter::new(Some("https://override.example".to_string()));
        assert_eq!(adapter.hosts[0], "https://override.example");
        assert_eq!(adapter.hosts.len(), default_hosts().len() + 1);
    }

    #[tokio::test]
    async fn worker_detail_looks_up_a_single_missing_worker() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sapi/v1/mining/worker/detail"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code": "000000",
                "data": {"workerName": "worker001", "hashRate": 7.0, "status": 1}
            })))
            .mount(&server)
            .await;

        let adapter = BinanceAdapter::with_hosts(vec![server.uri()]);
        let outcome = adapter
            .worker_detail("acct", "BTC", "worker001", &creds())
            .await;
        match outcome {
            Some(AdapterOutcome::Ok { workers, .. }) => {
                assert_eq!(workers.len(), 1);
                assert!(workers[0].is_online(0));
            }
            other => panic!("expected Some(Ok), got {other:?}"),
        }
    }
}
