//! Shared key-value store used by the lockout ledger and rate limiter.
//!
//! The store contract is deliberately small: string values, per-key TTLs,
//! lazy expiry. Implementations backed by a networked KV should map their
//! transport errors to "absent" on read so that ledger corruption or store
//! outages fail open rather than locking every identity out.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the value for `key`, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Option<String>;

    /// Stores `value` under `key`. A `ttl` of `None` keeps the entry until
    /// it is deleted or overwritten.
    async fn put(&self, key: &str, value: String, ttl: Option<Duration>);

    async fn delete(&self, key: &str);
}

/// In-process store. One instance is shared across all requests of a node;
/// cross-node deployments swap in a networked [`KvStore`] instead.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, Entry>>,
}

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> Arc<dyn KvStore> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) {
        let entry = Entry {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        };
        self.entries.lock().await.insert(key.to_string(), entry);
    }

    async fn delete(&self, key: &str) {
        self.entries.lock().await.remove(key);
    }
}

impl Entry {
    fn is_expired(&self) -> bool {
        self.expires_at
            .is_some_and(|expires_at| expires_at <= Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let kv = MemoryKv::new();
        kv.put("k", "v".to_string(), None).await;
        assert_eq!(kv.get("k").await.as_deref(), Some("v"));

        kv.delete("k").await;
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn test_expired_entry_reads_as_absent() {
        let kv = MemoryKv::new();
        kv.put("k", "v".to_string(), Some(Duration::from_millis(10)))
            .await;
        assert!(kv.get("k").await.is_some());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(kv.get("k").await, None);
    }

    #[tokio::test]
    async fn test_overwrite_refreshes_ttl() {
        let kv = MemoryKv::new();
        kv.put("k", "old".to_string(), Some(Duration::from_millis(10)))
            .await;
        kv.put("k", "new".to_string(), None).await;

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(kv.get("k").await.as_deref(), Some("new"));
    }
}
