//! Key-value side-state (§4.6, §6)
//!
//! Everything the reconciliation engine needs from the external key-value
//! store: the per-slot advisory lock and the two markers that back the
//! offline confirmation gate. The engine only ever talks to the `KvStore`
//! trait; `RedisKvStore` is the production backend, `MemoryKvStore` backs
//! engine tests without a live Redis.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

/// TTL for the per-slot advisory lock. The spec allows 14-20 minutes;
/// picked so a stuck tick cannot block the next slot's lock acquisition.
pub const SLOT_LOCK_TTL_SECONDS: u64 = 18 * 60;
/// TTL for `lastOnline` and `offlineCandidate` markers.
pub const MARKER_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv connection error: {0}")]
    Connection(String),
    #[error("kv command error: {0}")]
    Command(String),
}

fn lock_key(pool: &str, slot: &str) -> String {
    format!("uptime:{slot}:{pool}")
}

fn last_online_key(pool: &str, id: i64) -> String {
    format!("uptime:lastOnline:{pool}:{id}")
}

fn offline_candidate_key(pool: &str, id: i64) -> String {
    format!("uptime:lastOfflineCandidate:{pool}:{id}")
}

/// Advisory lock plus the two confirmation-gate markers (§3, §6).
#[async_trait]
pub trait KvStore: Send + Sync {
    /// `SET uptime:<slot>:<pool> 1 NX EX <ttl>`; true iff this call won the lock.
    async fn acquire_slot_lock(&self, pool: &str, slot: &str) -> Result<bool, KvError>;
    async fn get_last_online(&self, pool: &str, id: i64) -> Result<Option<String>, KvError>;
    async fn set_last_online(&self, pool: &str, id: i64, slot: &str) -> Result<(), KvError>;
    async fn clear_last_online(&self, pool: &str, id: i64) -> Result<(), KvError>;
    async fn get_offline_candidate(&self, pool: &str, id: i64) -> Result<Option<String>, KvError>;
    async fn set_offline_candidate(&self, pool: &str, id: i64, slot: &str) -> Result<(), KvError>;
    async fn clear_offline_candidate(&self, pool: &str, id: i64) -> Result<(), KvError>;
}

/// Redis-backed implementation using a multiplexed async connection.
pub struct RedisKvStore {
    conn: Mutex<redis::aio::ConnectionManager>,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> Result<Self, KvError> {
        let client = redis::Client::open(url).map_err(|e| KvError::Connection(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| KvError::Connection(e.to_string()))?;
        Ok(RedisKvStore {
            conn: Mutex::new(conn),
        })
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<bool, KvError> {
        let mut conn = self.conn.lock().await;
        let result: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut *conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), KvError> {
        let mut conn = self.conn.lock().await;
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_secs)
            .query_async(&mut *conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let mut conn = self.conn.lock().await;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut *conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let mut conn = self.conn.lock().await;
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut *conn)
            .await
            .map_err(|e| KvError::Command(e.to_string()))
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn acquire_slot_lock(&self, pool: &str, slot: &str) -> Result<bool, KvError> {
        self.set_nx_ex(&lock_key(pool, slot), "1", SLOT_LOCK_TTL_SECONDS)
            .await
    }

    async fn get_last_online(&self, pool: &str, id: i64) -> Result<Option<String>, KvError> {
        self.get(&last_online_key(pool, id)).await
    }

    async fn set_last_online(&self, pool: &str, id: i64, slot: &str) -> Result<(), KvError> {
        self.set_ex(&last_online_key(pool, id), slot, MARKER_TTL_SECONDS)
            .await
    }

    async fn clear_last_online(&self, pool: &str, id: i64) -> Result<(), KvError> {
        self.del(&last_online_key(pool, id)).await
    }

    async fn get_offline_candidate(&self, pool: &str, id: i64) -> Result<Option<String>, KvError> {
        self.get(&offline_candidate_key(pool, id)).await
    }

    async fn set_offline_candidate(&self, pool: &str, id: i64, slot: &str) -> Result<(), KvError> {
        self.set_ex(&offline_candidate_key(pool, id), slot, MARKER_TTL_SECONDS)
            .await
    }

    async fn clear_offline_candidate(&self, pool: &str, id: i64) -> Result<(), KvError> {
        self.del(&offline_candidate_key(pool, id)).await
    }
}

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-memory stand-in for `KvStore`, used by engine tests so the
/// confirmation state machine can be exercised without a live Redis.
#[derive(Clone)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        MemoryKvStore {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn get_raw(&self, key: &str) -> Option<String> {
        let mut map = self.entries.lock().await;
        match map.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set_raw(&self, key: &str, value: &str, ttl_secs: u64) {
        let mut map = self.entries.lock().await;
        map.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn acquire_slot_lock(&self, pool: &str, slot: &str) -> Result<bool, KvError> {
        let key = lock_key(pool, slot);
        if self.get_raw(&key).await.is_some() {
            return Ok(false);
        }
        self.set_raw(&key, "1", SLOT_LOCK_TTL_SECONDS).await;
        Ok(true)
    }

    async fn get_last_online(&self, pool: &str, id: i64) -> Result<Option<String>, KvError> {
        Ok(self.get_raw(&last_online_key(pool, id)).await)
    }

    async fn set_last_online(&self, pool: &str, id: i64, slot: &str) -> Result<(), KvError> {
        self.set_raw(&last_online_key(pool, id), slot, MARKER_TTL_SECONDS)
            .await;
        Ok(())
    }

    async fn clear_last_online(&self, pool: &str, id: i64) -> Result<(), KvError> {
        self.entries.lock().await.remove(&last_online_key(pool, id));
        Ok(())
    }

    async fn get_offline_candidate(&self, pool: &str, id: i64) -> Result<Option<String>, KvError> {
        Ok(self.get_raw(&offline_candidate_key(pool, id)).await)
    }

    async fn set_offline_candidate(&self, pool: &str, id: i64, slot: &str) -> Result<(), KvError> {
        self.set_raw(&offline_candidate_key(pool, id), slot, MARKER_TTL_SECONDS)
            .await;
        Ok(())
    }

    async fn clear_offline_candidate(&self, pool: &str, id: i64) -> Result<(), KvError> {
        self.entries
            .lock()
            .await
            .remove(&offline_candidate_key(pool, id));
        Ok(())
    }
}
