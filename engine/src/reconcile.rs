//! Reconciliation Engine (§4.6) — the confirmation state machine.
//!
//! Per tick, per pool: acquire the slot lock, load candidates, group them,
//! drive the adapter for each group, classify every miner in the group
//! against the observations, and aggregate the three mutation sets (hours
//! credit, status→online, status→offline) that `tick` applies in that
//! order once every group has resolved.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use uptimekeeper_adapters::registry::AdapterRegistry;
use uptimekeeper_adapters::{
    AdapterOutcome, Credentials, MatchStrategy, PoolAdapter, RequiredCredentials,
};
use uptimekeeper_core::{names, MinerRecord, MinerStatus, SlotId, WorkerObservation};
use uptimekeeper_kv::{KvError, KvStore};
use uptimekeeper_persistence::{PersistenceAdapter, PersistenceError};

use crate::coordinator::SlotCoordinator;
use crate::grouping::{group_candidates, GroupKey};

/// Window during which a recently-online miner is still credited for
/// billing even though the current poll can't confirm it (§4.6 GRACE).
pub const GRACE_MINUTES: i64 = 30;
/// Minimum age of an offline-candidate marker before the status actually
/// flips to `offline`. One elapsed slot is enough: the marker is only ever
/// written on the slot where a miner is first observed offline, so seeing
/// it still present on any later tick already means two consecutive
/// offline slots have been observed.
pub const OFFLINE_CONFIRM_MINUTES: i64 = uptimekeeper_core::slot::SLOT_MINUTES;

const DEFAULT_MAX_CONCURRENT_GROUPS: usize = 4;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("kv error: {0}")]
    Kv(#[from] KvError),
    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Debug, Default, Clone)]
pub struct TickReport {
    pub pool: String,
    pub groups_processed: usize,
    pub credited_ids: Vec<i64>,
    pub online_ids: Vec<i64>,
    pub offline_ids: Vec<i64>,
    pub skip_reason: Option<String>,
}

#[derive(Debug, Default)]
struct GroupReport {
    credited: Vec<i64>,
    online: Vec<i64>,
    offline: Vec<i64>,
}

pub struct ReconciliationEngine {
    registry: AdapterRegistry,
    persistence: Arc<dyn PersistenceAdapter>,
    kv: Arc<dyn KvStore>,
    coordinator: Arc<SlotCoordinator>,
    max_concurrent_groups: usize,
}

impl ReconciliationEngine {
    pub fn new(
        registry: AdapterRegistry,
        persistence: Arc<dyn PersistenceAdapter>,
        kv: Arc<dyn KvStore>,
    ) -> Self {
        ReconciliationEngine {
            registry,
            persistence,
            kv,
            coordinator: Arc::new(SlotCoordinator::new(SlotId::current())),
            max_concurrent_groups: DEFAULT_MAX_CONCURRENT_GROUPS,
        }
    }

    pub fn with_max_concurrent_groups(mut self, n: usize) -> Self {
        self.max_concurrent_groups = n;
        self
    }

    pub async fn tick(&self, pool: &str) -> Result<TickReport, EngineError> {
        let slot = SlotId::current();
        self.tick_at(pool, slot).await
    }

    /// `tick` with an explicit slot, so tests can drive the state machine
    /// across synthetic consecutive slots.
    pub async fn tick_at(&self, pool: &str, slot: SlotId) -> Result<TickReport, EngineError> {
        let mut report = TickReport {
            pool: pool.to_string(),
            ..Default::default()
        };

        let Some(adapter) = self.registry.resolve(pool) else {
            warn!("unsupported pool {pool}, skipping tick");
            report.skip_reason = Some("unsupported_pool".to_string());
            return Ok(report);
        };

        if !self.kv.acquire_slot_lock(pool, &slot.to_string()).await? {
            debug!("slot lock for {pool}@{slot} already held, skipping");
            report.skip_reason = Some("slot_locked".to_string());
            return Ok(report);
        }

        let candidates: Vec<MinerRecord> = self
            .persistence
            .select_candidates(pool)
            .await?
            .into_iter()
            .filter(|m| !m.status.is_maintenance())
            .collect();

        let single_tenant = pool.eq_ignore_ascii_case("litecoinpool");
        let groups = group_candidates(candidates, single_tenant);
        report.groups_processed = groups.len();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_groups.max(1)));
        let mut joinset: JoinSet<GroupReport> = JoinSet::new();

        for (key, miners) in groups {
            let permit_guard = semaphore.clone();
            let adapter = adapter.clone();
            let kv = self.kv.clone();
            let coordinator = self.coordinator.clone();
            let pool_name = pool.to_string();

            joinset.spawn(async move {
                let _permit = permit_guard
                    .acquire_owned()
                    .await
                    .expect("semaphore never closed");
                process_group(adapter, kv, coordinator, pool_name, slot, key, miners).await
            });
        }

        while let Some(result) = joinset.join_next().await {
            match result {
                Ok(group_report) => {
                    report.credited_ids.extend(group_report.credited);
                    report.online_ids.extend(group_report.online);
                    report.offline_ids.extend(group_report.offline);
                }
                Err(e) => warn!("group processing task failed: {e}"),
            }
        }

        if !report.credited_ids.is_empty() {
            self.persistence
                .increment_hours(&report.credited_ids)
                .await?;
        }
        if !report.online_ids.is_empty() {
            self.persistence
                .set_status(&report.online_ids, "online")
                .await?;
        }
        if !report.offline_ids.is_empty() {
            self.persistence
                .set_status(&report.offline_ids, "offline")
                .await?;
        }

        info!(
            "tick {pool}@{slot}: {} groups, {} credited, {} online, {} offline",
            report.groups_processed,
            report.credited_ids.len(),
            report.online_ids.len(),
            report.offline_ids.len()
        );

        Ok(report)
    }
}

async fn process_group(
    adapter: Arc<dyn PoolAdapter>,
    kv: Arc<dyn KvStore>,
    coordinator: Arc<SlotCoordinator>,
    pool_name: String,
    slot: SlotId,
    key: GroupKey,
    miners: Vec<MinerRecord>,
) -> GroupReport {
    let creds = Credentials {
        api_key: key.api_key.clone(),
        secret_key: key.secret_key.clone(),
    };

    if adapter.required_credentials() == RequiredCredentials::ApiKeyAndSecret
        && creds
            .secret_key
            .as_deref()
            .map(str::is_empty)
            .unwrap_or(true)
    {
        warn!(
            "group for {pool_name} missing required secret_key, treating as configuration failure"
        );
        return api_failure_branch(&miners, &kv, &coordinator, &pool_name, slot).await;
    }

    let coin = miners.first().map(|m| m.coin.clone()).unwrap_or_default();
    let outcome = adapter.list_workers(&key.account, &coin, &creds).await;

    let workers = match outcome {
        AdapterOutcome::Fail {
            reason,
            endpoint,
            diag,
        } => {
            warn!("adapter failure for {pool_name} group ({endpoint}): {reason} ({diag})");
            return api_failure_branch(&miners, &kv, &coordinator, &pool_name, slot).await;
        }
        AdapterOutcome::Ok { workers, .. } => workers,
    };

    let mut index = ObsIndex::build(workers);

    // ViaBTC: a second call solely to rescue miners the first call would
    // classify offline; either call reporting online wins (§4.4.1).
    let second_index = if pool_name.eq_ignore_ascii_case("viabtc") {
        match adapter.list_workers(&key.account, &coin, &creds).await {
            AdapterOutcome::Ok { workers, .. } => Some(ObsIndex::build(workers)),
            AdapterOutcome::Fail { .. } => None,
        }
    } else {
        None
    };

    let strategy = adapter.match_strategy();
    let any_matched = miners.iter().any(|m| {
        index.find(&m.worker_name, strategy).is_some()
            || second_index
                .as_ref()
                .map(|i| i.find(&m.worker_name, strategy).is_some())
                .unwrap_or(false)
    });

    // Binance worker-not-in-list fallback (§4.4.5): only when paging turned
    // up none of the group's miners, look each one up individually and fold
    // the result into the index. Adapters without this capability (every
    // pool but Binance) return `None` immediately, so this costs nothing.
    if !any_matched {
        for miner in &miners {
            let tail = names::tail(&miner.worker_name);
            if let Some(AdapterOutcome::Ok {
                workers: detail, ..
            }) = adapter
                .worker_detail(&key.account, &coin, tail, &creds)
                .await
            {
                index.merge(detail);
            }
        }
    }

    observation_branch(
        &miners,
        &index,
        second_index.as_ref(),
        strategy,
        &kv,
        &coordinator,
        &pool_name,
        slot,
    )
    .await
}

struct ObsIndex {
    by_exact: HashMap<String, WorkerObservation>,
    by_tail: HashMap<String, WorkerObservation>,
    by_tail_key: HashMap<String, WorkerObservation>,
}

impl ObsIndex {
    fn build(workers: Vec<WorkerObservation>) -> Self {
        let mut index = ObsIndex {
            by_exact: HashMap::new(),
            by_tail: HashMap::new(),
            by_tail_key: HashMap::new(),
        };
        index.merge(workers);
        index
    }

    fn merge(&mut self, workers: Vec<WorkerObservation>) {
        for w in workers {
            let tail = names::tail(&w.name).to_string();
            let tail_key = names::tail_key(&w.name);
            self.by_tail_key
                .entry(tail_key)
                .or_insert_with(|| w.clone());
            self.by_exact.insert(w.name.clone(), w.clone());
            self.by_tail.insert(tail, w);
        }
    }

    fn find(&self, worker_name: &str, strategy: MatchStrategy) -> Option<&WorkerObservation> {
        if strategy == MatchStrategy::ExactThenTail {
            if let Some(w) = self.by_exact.get(worker_name) {
                return Some(w);
            }
        }
        let tail = names::tail(worker_name);
        let tail_key = names::tail_key(worker_name);
        self.by_tail
            .get(tail)
            .or_else(|| self.by_tail_key.get(&tail_key))
    }
}

async fn grace_credit(
    miner: &MinerRecord,
    kv: &Arc<dyn KvStore>,
    pool_name: &str,
    slot: SlotId,
) -> bool {
    if matches!(miner.status, MinerStatus::Online) {
        return true;
    }
    match kv
        .get_last_online(pool_name, miner.id)
        .await
        .unwrap_or(None)
    {
        Some(marker) => SlotId::parse(&marker)
            .map(|s| slot.minutes_since(s) <= GRACE_MINUTES)
            .unwrap_or(false),
        None => false,
    }
}

async fn api_failure_branch(
    miners: &[MinerRecord],
    kv: &Arc<dyn KvStore>,
    coordinator: &Arc<SlotCoordinator>,
    pool_name: &str,
    slot: SlotId,
) -> GroupReport {
    let mut credited = Vec::new();
    for miner in miners {
        if grace_credit(miner, kv, pool_name, slot).await {
            credited.push(miner.id);
        }
    }
    let credited = coordinator.dedupe(slot, credited).await;
    GroupReport {
        credited,
        online: Vec::new(),
        offline: Vec::new(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn observation_branch(
    miners: &[MinerRecord],
    index: &ObsIndex,
    second_index: Option<&ObsIndex>,
    strategy: MatchStrategy,
    kv: &Arc<dyn KvStore>,
    coordinator: &Arc<SlotCoordinator>,
    pool_name: &str,
    slot: SlotId,
) -> GroupReport {
    let mut credited = Vec::new();
    let mut online = Vec::new();
    let mut offline = Vec::new();
    let now = now_ms();

    for miner in miners {
        let first = index.find(&miner.worker_name, strategy);
        let second = second_index.and_then(|i| i.find(&miner.worker_name, strategy));
        let matched = first.is_some() || second.is_some();
        let is_online = first.map(|o| o.is_online(now)).unwrap_or(false)
            || second.map(|o| o.is_online(now)).unwrap_or(false);

        if matched && is_online {
            credited.push(miner.id);
            if !matches!(miner.status, MinerStatus::Online) {
                online.push(miner.id);
            }
            let _ = kv
                .set_last_online(pool_name, miner.id, &slot.to_string())
                .await;
            let _ = kv.clear_offline_candidate(pool_name, miner.id).await;
            continue;
        }

        if matched {
            if matches!(miner.status, MinerStatus::Offline) {
                let _ = kv.clear_offline_candidate(pool_name, miner.id).await;
                continue;
            }

            match kv
                .get_offline_candidate(pool_name, miner.id)
                .await
                .unwrap_or(None)
            {
                None => {
                    let _ = kv
                        .set_offline_candidate(pool_name, miner.id, &slot.to_string())
                        .await;
                    credited.push(miner.id);
                }
                Some(marker) => {
                    let age = SlotId::parse(&marker)
                        .map(|s| slot.minutes_since(s))
                        .unwrap_or(i64::MAX);
                    if age >= OFFLINE_CONFIRM_MINUTES {
                        offline.push(miner.id);
                        let _ = kv.clear_offline_candidate(pool_name, miner.id).await;
                        let _ = kv.clear_last_online(pool_name, miner.id).await;
                    } else {
                        credited.push(miner.id);
                    }
                }
            }
            continue;
        }

        if grace_credit(miner, kv, pool_name, slot).await {
            credited.push(miner.id);
        }
    }

    let credited = coordinator.dedupe(slot, credited).await;
    GroupReport {
        credited,
        online,
        offline,
    }
}
