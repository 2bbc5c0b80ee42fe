//! Pool Adapters
//!
//! Each pool adapter translates one pool's idiosyncratic HTTP API into the
//! uniform `WorkerObservation` list the reconciliation engine and the
//! status read service both consume. An adapter MUST return `Fail` rather
//! than an empty `Ok` whenever the pool API returned a transport error, a
//! logical error code, or an unparseable payload — an empty `Ok` means the
//! pool authoritatively reports zero workers for the account.

use async_trait::async_trait;
use uptimekeeper_core::WorkerObservation;

pub mod binance;
pub mod f2pool;
pub mod litecoinpool;
pub mod miningdutch;
pub mod registry;
pub mod viabtc;

/// Credentials a group carries; `secret_key` is only populated for pools
/// that sign requests (Binance).
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: Option<String>,
}

/// Which credential columns a pool requires, for candidate selection and
/// capability discovery (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredCredentials {
    ApiKeyOnly,
    ApiKeyAndSecret,
}

/// Why an adapter returned `Fail` (§7 error taxonomy).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailReason {
    Transport,
    Http(u16),
    Logical(String),
    Schema,
    Geoblocked,
    Auth,
}

impl std::fmt::Display for FailReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailReason::Transport => write!(f, "transport"),
            FailReason::Http(status) => write!(f, "http:{status}"),
            FailReason::Logical(code) => write!(f, "logical:{code}"),
            FailReason::Schema => write!(f, "schema"),
            FailReason::Geoblocked => write!(f, "geoblocked"),
            FailReason::Auth => write!(f, "auth"),
        }
    }
}

/// Result of one `list_workers` call (§4.4 common contract).
#[derive(Debug, Clone)]
pub enum AdapterOutcome {
    Ok {
        workers: Vec<WorkerObservation>,
        endpoint: String,
    },
    Fail {
        reason: FailReason,
        endpoint: String,
        diag: String,
    },
}

impl AdapterOutcome {
    pub fn fail(reason: FailReason, endpoint: impl Into<String>, diag: impl Into<String>) -> Self {
        AdapterOutcome::Fail {
            reason,
            endpoint: endpoint.into(),
            diag: diag.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, AdapterOutcome::Ok { .. })
    }
}

/// How the engine should match a persisted miner row's `worker_name`
/// against a pool's reported observations (§4.6 observation branch).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchStrategy {
    /// Match on `tail(name)`, falling back to `tail_key(name)`. The default
    /// for every pool that doesn't override it.
    #[default]
    TailOnly,
    /// Try an exact `worker_name` match first, then fall back to `TailOnly`
    /// (LiteCoinPool, §4.4.2).
    ExactThenTail,
}

/// Common adapter contract (§4.4).
#[async_trait]
pub trait PoolAdapter: Send + Sync {
    fn pool_name(&self) -> &'static str;
    fn required_credentials(&self) -> RequiredCredentials;
    async fn list_workers(&self, account: &str, coin: &str, creds: &Credentials) -> AdapterOutcome;

    /// Adapter-specific override of how the engine matches a miner row to
    /// an observation. Most pools are happy with the uniform tail match.
    fn match_strategy(&self) -> MatchStrategy {
        MatchStrategy::TailOnly
    }

    /// Detail lookup for a single worker the engine expected but didn't see
    /// in `list_workers`'s result (Binance's worker-not-in-list fallback,
    /// §4.4.5). `None` means the pool has no such capability; adapters that
    /// don't override this never pay for the call.
    async fn worker_detail(
        &self,
        _account: &str,
        _coin: &str,
        _worker_name: &str,
        _creds: &Credentials,
    ) -> Option<AdapterOutcome> {
        None
    }
}

/// True when `DEBUG_UPTIME_<POOL>` is set, gating the extra `trace!` output
/// an adapter logs beyond its baseline `debug!`-per-call/`warn!`-on-`Fail`
/// lines (§2a).
pub fn debug_gate(pool: &str) -> bool {
    std::env::var(format!("DEBUG_UPTIME_{}", pool.to_uppercase())).is_ok()
}

fn current_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
