//! Status Read Service (§4.9)
//!
//! Reuses the pool adapters directly — no key-value store, no mutation.
//! Answers are cached for 30 seconds per miner id unless `refresh` is set,
//! and a batch query services cache misses with bounded concurrency while
//! preserving the caller's requested order.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::warn;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};

use uptimekeeper_adapters::registry::AdapterRegistry;
use uptimekeeper_adapters::{AdapterOutcome, Credentials};
use uptimekeeper_core::names;
use uptimekeeper_persistence::PersistenceAdapter;

const CACHE_TTL_SECONDS: u64 = 30;
const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusProjection {
    pub id: i64,
    pub worker_status: String,
    pub hashrate_10min: f64,
    pub source: String,
    pub worker_found: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusProjection {
    fn offline_fallback(id: i64, error: impl Into<String>) -> Self {
        StatusProjection {
            id,
            worker_status: "offline".to_string(),
            hashrate_10min: 0.0,
            source: String::new(),
            worker_found: false,
            error: Some(error.into()),
        }
    }
}

struct CacheEntry {
    value: StatusProjection,
    expires_at: Instant,
}

pub struct StatusReadService {
    persistence: Arc<dyn PersistenceAdapter>,
    registry: Arc<AdapterRegistry>,
    cache: Mutex<HashMap<i64, CacheEntry>>,
    concurrency: Arc<Semaphore>,
}

impl StatusReadService {
    pub fn new(persistence: Arc<dyn PersistenceAdapter>, registry: Arc<AdapterRegistry>) -> Self {
        Self::with_concurrency(persistence, registry, DEFAULT_CONCURRENCY)
    }

    pub fn with_concurrency(
        persistence: Arc<dyn PersistenceAdapter>,
        registry: Arc<AdapterRegistry>,
        concurrency: usize,
    ) -> Self {
        StatusReadService {
            persistence,
            registry,
            cache: Mutex::new(HashMap::new()),
            concurrency: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }

    pub async fn get_status(&self, id: i64, refresh: bool) -> StatusProjection {
        if !refresh {
            if let Some(cached) = self.cached(id).await {
                return cached;
            }
        }
        let projection = self.fetch(id).await;
        self.store(id, projection.clone()).await;
        projection
    }

    /// Services a batch request: cache hits return immediately, misses are
    /// serviced with bounded concurrency, results preserve request order.
    pub async fn get_status_many(&self, ids: &[i64]) -> Vec<StatusProjection> {
        let mut results: Vec<Option<StatusProjection>> = vec![None; ids.len()];
        let mut misses = Vec::new();

        for (idx, &id) in ids.iter().enumerate() {
            match self.cached(id).await {
                Some(cached) => results[idx] = Some(cached),
                None => misses.push(idx),
            }
        }

        let mut handles = Vec::new();
        for idx in misses {
            let id = ids[idx];
            let permit = self
                .concurrency
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore never closed");
            let persistence = self.persistence.clone();
            let registry = self.registry.clone();
            handles.push((
                idx,
                tokio::spawn(async move {
                    let _permit = permit;
                    fetch_projection(&persistence, &registry, id).await
                }),
            ));
        }

        for (idx, handle) in handles {
            let projection = match handle.await {
                Ok(p) => p,
                Err(e) => {
                    warn!("status fetch task failed: {e}");
                    StatusProjection::offline_fallback(ids[idx], "internal_error")
                }
            };
            self.store(ids[idx], projection.clone()).await;
            results[idx] = Some(projection);
        }

        results
            .into_iter()
            .map(|r| r.expect("every index filled"))
            .collect()
    }

    async fn cached(&self, id: i64) -> Option<StatusProjection> {
        let cache = self.cache.lock().await;
        cache
            .get(&id)
            .filter(|e| e.expires_at > Instant::now())
            .map(|e| e.value.clone())
    }

    async fn store(&self, id: i64, value: StatusProjection) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            id,
            CacheEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(CACHE_TTL_SECONDS),
            },
        );
    }

    async fn fetch(&self, id: i64) -> StatusProjection {
        fetch_projection(&self.persistence, &self.registry, id).await
    }
}

async fn fetch_projection(
    persistence: &Arc<dyn PersistenceAdapter>,
    registry: &AdapterRegistry,
    id: i64,
) -> StatusProjection {
    let miner = match persistence.get_miner(id).await {
        Ok(Some(m)) => m,
        Ok(None) => return StatusProjection::offline_fallback(id, "not_found"),
        Err(e) => {
            warn!("status lookup for miner {id} failed: {e}");
            return StatusProjection::offline_fallback(id, "db_error");
        }
    };

    if miner.status.is_maintenance() {
        return StatusProjection {
            id,
            worker_status: "maintenance".to_string(),
            hashrate_10min: 0.0,
            source: miner.pool,
            worker_found: true,
            error: None,
        };
    }

    let Some(adapter) = registry.resolve(&miner.pool) else {
        return StatusProjection::offline_fallback(id, "unsupported_pool");
    };

    let creds = Credentials {
        api_key: miner.api_key.clone(),
        secret_key: miner.secret_key.clone(),
    };
    let account = names::head(&miner.worker_name).to_string();
    let outcome = adapter.list_workers(&account, &miner.coin, &creds).await;

    match outcome {
        AdapterOutcome::Fail { reason, .. } => {
            let mut projection = StatusProjection::offline_fallback(id, reason.to_string());
            projection.source = miner.pool;
            projection
        }
        AdapterOutcome::Ok { workers, .. } => {
            let tail = names::tail(&miner.worker_name);
            let tail_key = names::tail_key(&miner.worker_name);
            let found = workers
                .iter()
                .find(|w| names::tail(&w.name) == tail || names::tail_key(&w.name) == tail_key);

            match found {
                Some(obs) => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    StatusProjection {
                        id,
                        worker_status: if obs.is_online(now_ms) {
                            "online"
                        } else {
                            "offline"
                        }
                        .to_string(),
                        hashrate_10min: obs.hashrate,
                        source: miner.pool,
                        worker_found: true,
                        error: None,
                    }
                }
                None => StatusProjection {
                    id,
                    worker_status: "offline".to_string(),
                    hashrate_10min: 0.0,
                    source: miner.pool,
                    worker_found: false,
                    error: None,
                },
            }
        }
    }
}
