//! Process configuration (§2a, §6)
//!
//! Assembled once at startup from already-present environment variables.
//! Loading secrets into the environment (`.env`, vault, …) stays external
//! per the spec's non-goals — this struct only reads `std::env`.

use std::env;

use uptimekeeper_persistence::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub kv_url: String,
    pub status_port: u16,
    pub status_concurrency: usize,
    /// `BINANCE_BASE`: host probed before the regional `api`/`api1`/`api2`/
    /// `api3.binance.com` fallbacks (§4.4.5).
    pub binance_base: Option<String>,
    pub db: DbConfig,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Config {
            database_url: env_or("DATABASE_URL", "postgres://localhost/uptimekeeper"),
            kv_url: env_or("KV_URL", "redis://localhost:6379"),
            status_port: env_parsed("STATUS_PORT", 4000),
            status_concurrency: env_parsed("STATUS_CONCURRENCY", 4),
            binance_base: env::var("BINANCE_BASE").ok(),
            db: DbConfig {
                max_connections: env_parsed("DB_MAX_CONNECTIONS", 10),
                idle_timeout_secs: env_parsed("DB_IDLE_TIMEOUT", 300),
                connect_timeout_secs: env_parsed("DB_CONNECT_TIMEOUT", 10),
                retries: env_parsed("DB_RETRIES", 3),
            },
        }
    }
}
