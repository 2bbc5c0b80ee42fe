//! Grouping (§4.6 step 3)
//!
//! Collapses candidate miners into the sets that map to a single pool API
//! call: `(api_key, secret_key, account, coin)` for account-keyed pools, or
//! `api_key` alone for single-tenant pools like LiteCoinPool.

use std::collections::HashMap;

use uptimekeeper_core::{names, MinerRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub api_key: String,
    pub secret_key: Option<String>,
    pub account: String,
    pub coin: String,
}

pub fn group_candidates(
    miners: Vec<MinerRecord>,
    single_tenant: bool,
) -> HashMap<GroupKey, Vec<MinerRecord>> {
    let mut groups: HashMap<GroupKey, Vec<MinerRecord>> = HashMap::new();
    for miner in miners {
        let key = if single_tenant {
            GroupKey {
                api_key: miner.api_key.clone(),
                secret_key: None,
                account: String::new(),
                coin: String::new(),
            }
        } else {
            GroupKey {
                api_key: miner.api_key.clone(),
                secret_key: miner.secret_key.clone(),
                account: names::head(&miner.worker_name).to_string(),
                coin: miner.coin.clone(),
            }
        };
        groups.entry(key).or_default().push(miner);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use uptimekeeper_core::MinerStatus;

    fn miner(id: i64, api_key: &str, worker_name: &str, coin: &str) -> MinerRecord {
        MinerRecord {
            id,
            pool: "viabtc".to_string(),
            coin: coin.to_string(),
            worker_name: worker_name.to_string(),
            api_key: api_key.to_string(),
            secret_key: None,
            status: MinerStatus::Online,
            total_horas_online: 0.0,
        }
    }

    #[test]
    fn account_keyed_pools_group_by_key_secret_account_coin() {
        let miners = vec![
            miner(1, "k1", "acctA.worker001", "BTC"),
            miner(2, "k1", "acctA.worker002", "BTC"),
            miner(3, "k1", "acctB.worker001", "BTC"),
        ];
        let groups = group_candidates(miners, false);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn single_tenant_pools_group_by_api_key_alone() {
        let miners = vec![
            miner(1, "k1", "worker001", "LTC"),
            miner(2, "k1", "worker002", "LTC"),
            miner(3, "k2", "worker003", "LTC"),
        ];
        let groups = group_candidates(miners, true);
        assert_eq!(groups.len(), 2);
    }
}
