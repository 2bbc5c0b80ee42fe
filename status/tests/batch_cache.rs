//! §8 scenario 6: two back-to-back batch reads within the 30-second window
//! return identical projections and only issue one adapter call.

use std::sync::Arc;

use async_trait::async_trait;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use uptimekeeper_adapters::registry::AdapterRegistry;
use uptimekeeper_adapters::viabtc::ViaBtcAdapter;
use uptimekeeper_core::{MinerRecord, MinerStatus};
use uptimekeeper_persistence::{PersistenceAdapter, PersistenceError};
use uptimekeeper_status::StatusReadService;

struct SingleRow(MinerRecord);

#[async_trait]
impl PersistenceAdapter for SingleRow {
    async fn select_candidates(&self, _pool: &str) -> Result<Vec<MinerRecord>, PersistenceError> {
        Ok(vec![self.0.clone()])
    }
    async fn increment_hours(&self, _ids: &[i64]) -> Result<u64, PersistenceError> {
        Ok(0)
    }
    async fn set_status(
        &self,
        _ids: &[i64],
        _new_status: &str,
    ) -> Result<Vec<i64>, PersistenceError> {
        Ok(Vec::new())
    }
    async fn get_miner(&self, id: i64) -> Result<Option<MinerRecord>, PersistenceError> {
        Ok(if id == self.0.id {
            Some(self.0.clone())
        } else {
            None
        })
    }
}

#[tokio::test]
async fn second_batch_call_within_ttl_hits_no_adapter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/res/openapi/v1/hashrate/worker"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": {"data": [{"worker_name": "acct.worker001", "hashrate_10min": 50.0, "worker_status": "active"}]},
        })))
        .mount(&server)
        .await;

    let registry = Arc::new(AdapterRegistry::from_adapters(vec![Arc::new(
        ViaBtcAdapter::with_base_url(server.uri()),
    )]));
    let persistence: Arc<dyn PersistenceAdapter> = Arc::new(SingleRow(MinerRecord {
        id: 1,
        pool: "viabtc".to_string(),
        coin: "BTC".to_string(),
        worker_name: "acct.worker001".to_string(),
        api_key: "k".to_string(),
        secret_key: None,
        status: MinerStatus::Online,
        total_horas_online: 1.0,
    }));
    let service = StatusReadService::new(persistence, registry);

    let first = service.get_status_many(&[1]).await;
    let second = service.get_status_many(&[1]).await;

    assert_eq!(first, second);
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}
