//! Adapter Registry (§4.5)
//!
//! Resolves a miner row's `pool` column to the adapter that speaks that
//! pool's API. Lookup is case-insensitive; anything that doesn't match one
//! of the five known pools is reported so the engine can skip the group
//! with an `unsupported_pool` reason rather than fail the whole tick.

use std::sync::Arc;

use crate::binance::BinanceAdapter;
use crate::f2pool::F2PoolAdapter;
use crate::litecoinpool::LiteCoinPoolAdapter;
use crate::miningdutch::MiningDutchAdapter;
use crate::viabtc::ViaBtcAdapter;
use crate::{PoolAdapter, RequiredCredentials};

pub const UNSUPPORTED_POOL: &str = "unsupported_pool";

pub struct AdapterRegistry {
    adapters: Vec<Arc<dyn PoolAdapter>>,
}

impl AdapterRegistry {
    /// `binance_base` is the `BINANCE_BASE` config override, if any (§2a).
    pub fn new(binance_base: Option<String>) -> Self {
        AdapterRegistry {
            adapters: vec![
                Arc::new(ViaBtcAdapter::new()),
                Arc::new(LiteCoinPoolAdapter::new()),
                Arc::new(MiningDutchAdapter::new()),
                Arc::new(F2PoolAdapter::new()),
                Arc::new(BinanceAdapter::new(binance_base)),
            ],
        }
    }

    /// Builds a registry from an explicit adapter set, bypassing the real
    /// default hosts — used by engine tests to inject wiremock-backed
    /// adapters.
    pub fn from_adapters(adapters: Vec<Arc<dyn PoolAdapter>>) -> Self {
        AdapterRegistry { adapters }
    }

    /// Resolves a pool name (case-insensitive) to its adapter, or `None` if
    /// the name does not match any of the five supported pools.
    pub fn resolve(&self, pool: &str) -> Option<Arc<dyn PoolAdapter>> {
        let normalized = pool.trim().to_lowercase();
        self.adapters
            .iter()
            .find(|a| a.pool_name() == normalized)
            .cloned()
    }

    pub fn required_credentials(&self, pool: &str) -> Option<RequiredCredentials> {
        self.resolve(pool).map(|a| a.required_credentials())
    }

    pub fn supported_pools(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.pool_name()).collect()
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_pools_case_insensitively() {
        let registry = AdapterRegistry::new(None);
        assert!(registry.resolve("ViaBTC").is_some());
        assert!(registry.resolve("VIABTC").is_some());
        assert!(registry.resolve("litecoinpool").is_some());
        assert!(registry.resolve("MiningDutch").is_some());
        assert!(registry.resolve("f2pool").is_some());
        assert!(registry.resolve("Binance").is_some());
    }

    #[test]
    fn unknown_pool_resolves_to_none() {
        let registry = AdapterRegistry::new(None);
        assert!(registry.resolve("nicehash").is_none());
    }

    #[test]
    fn required_credentials_distinguish_binance_from_api_key_only_pools() {
        let registry = AdapterRegistry::new(None);
        assert_eq!(
            registry.required_credentials("viabtc"),
            Some(RequiredCredentials::ApiKeyOnly)
        );
        assert_eq!(
            registry.required_credentials("binance"),
            Some(RequiredCredentials::ApiKeyAndSecret)
        );
    }

    #[test]
    fn supported_pools_lists_all_five() {
        let registry = AdapterRegistry::new(None);
        assert_eq!(registry.supported_pools().len(), 5);
    }
}
