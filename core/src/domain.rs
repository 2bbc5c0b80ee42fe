//! Domain model shared by every adapter, the reconciliation engine and the
//! status read service: miner rows (as read from the relational database)
//! and the uniform worker observation every pool adapter normalises into.

use serde::{Deserialize, Serialize};

/// Labels a pool may report in a free-form status field that unambiguously
/// mean "hashing" regardless of hashrate being reported.
pub const POSITIVE_LABELS: &[&str] = &[
    "active",
    "online",
    "alive",
    "running",
    "up",
    "ok",
    "connected",
    "working",
    "ativo",
    "ligado",
    "ativa",
];

/// Labels that force offline even when hashrate is unknown or positive.
pub const NEGATIVE_LABELS: &[&str] = &[
    "unactive",
    "inactive",
    "offline",
    "down",
    "dead",
    "parado",
    "desligado",
    "inativa",
];

/// How recent an F2Pool `last_share_at` has to be to still count as online.
pub const F2POOL_RECENCY_MINUTES: i64 = 90;

/// Coarse lifecycle status stored on the miner row. `maintenance` is sticky:
/// no engine path may mutate a row whose status folds to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MinerStatus {
    Online,
    Offline,
    Maintenance,
    Other(String),
}

impl MinerStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "online" => MinerStatus::Online,
            "offline" => MinerStatus::Offline,
            "maintenance" => MinerStatus::Maintenance,
            other => MinerStatus::Other(other.to_string()),
        }
    }

    pub fn as_db_str(&self) -> &str {
        match self {
            MinerStatus::Online => "online",
            MinerStatus::Offline => "offline",
            MinerStatus::Maintenance => "maintenance",
            MinerStatus::Other(s) => s.as_str(),
        }
    }

    pub fn is_maintenance(&self) -> bool {
        matches!(self, MinerStatus::Maintenance)
    }
}

/// Miner record as read from the `miners` table (§3, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerRecord {
    pub id: i64,
    pub pool: String,
    pub coin: String,
    pub worker_name: String,
    pub api_key: String,
    pub secret_key: Option<String>,
    pub status: MinerStatus,
    pub total_horas_online: f64,
}

/// Worker observation produced by every pool adapter (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerObservation {
    pub name: String,
    pub hashrate: f64,
    pub alive_hint: Option<f64>,
    pub status_text: Option<String>,
    pub last_share_ms: Option<i64>,
}

impl WorkerObservation {
    /// §3: an observation is online when any positive signal fires, unless
    /// an explicit negative label forces it offline first.
    pub fn is_online(&self, now_ms: i64) -> bool {
        if let Some(label) = &self.status_text {
            let lower = label.trim().to_lowercase();
            if NEGATIVE_LABELS.contains(&lower.as_str()) {
                return false;
            }
        }

        if self.hashrate > 0.0 {
            return true;
        }

        if let Some(label) = &self.status_text {
            let lower = label.trim().to_lowercase();
            if POSITIVE_LABELS.contains(&lower.as_str()) {
                return true;
            }
        }

        if let Some(alive) = self.alive_hint {
            if alive > 0.0 {
                return true;
            }
        }

        if let Some(last_share_ms) = self.last_share_ms {
            if last_share_ms > 0 {
                let age_minutes = (now_ms - last_share_ms) / 60_000;
                if age_minutes < F2POOL_RECENCY_MINUTES {
                    return true;
                }
            }
        }

        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashrate_alone_is_online() {
        let obs = WorkerObservation {
            hashrate: 50.0,
            ..Default::default()
        };
        assert!(obs.is_online(0));
    }

    #[test]
    fn negative_label_forces_offline_even_with_hashrate_unknown() {
        let obs = WorkerObservation {
            status_text: Some("unactive".to_string()),
            ..Default::default()
        };
        assert!(!obs.is_online(0));
    }

    #[test]
    fn positive_label_online_with_zero_hashrate() {
        let obs = WorkerObservation {
            hashrate: 0.0,
            status_text: Some("active".to_string()),
            ..Default::default()
        };
        assert!(obs.is_online(0));
    }

    #[test]
    fn recent_last_share_counts_online() {
        let now_ms = 1_000_000_000_000;
        let obs = WorkerObservation {
            last_share_ms: Some(now_ms - 10 * 60_000),
            ..Default::default()
        };
        assert!(obs.is_online(now_ms));
    }

    #[test]
    fn stale_last_share_does_not_count_online() {
        let now_ms = 1_000_000_000_000;
        let obs = WorkerObservation {
            last_share_ms: Some(now_ms - 120 * 60_000),
            ..Default::default()
        };
        assert!(!obs.is_online(now_ms));
    }

    #[test]
    fn maintenance_is_sticky_regardless_of_case() {
        assert!(MinerStatus::parse("Maintenance").is_maintenance());
        assert!(MinerStatus::parse("MAINTENANCE").is_maintenance());
        assert!(!MinerStatus::parse("online").is_maintenance());
    }
}
