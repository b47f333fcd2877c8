//! Fixed-window request throttle backed by the KV store.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;

#[derive(Serialize, Deserialize)]
struct WindowRecord {
    count: u32,
    reset_at_ms: i64,
}

/// Counts a hit against `key` and reports whether it is still within
/// `limit` for the window. The window is fixed, not sliding: the counter
/// resets wholesale when it elapses. A corrupt record resets the window.
pub async fn check_rate_limit(
    kv: &Arc<dyn KvStore>,
    key: &str,
    limit: u32,
    window: Duration,
    now_ms: i64,
) -> bool {
    let key = format!("ratelimit:{key}");

    let current = match kv.get(&key).await {
        Some(raw) => serde_json::from_str::<WindowRecord>(&raw)
            .ok()
            .filter(|record| record.reset_at_ms > now_ms),
        None => None,
    };

    let record = match current {
        Some(record) => WindowRecord {
            count: record.count + 1,
            reset_at_ms: record.reset_at_ms,
        },
        None => WindowRecord {
            count: 1,
            reset_at_ms: now_ms + window.as_millis() as i64,
        },
    };
    let allowed = record.count <= limit;

    let payload = serde_json::to_string(&record).unwrap_or_default();
    kv.put(&key, payload, Some(window)).await;

    allowed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKv;

    #[tokio::test]
    async fn test_limit_is_enforced_within_window() {
        let kv = MemoryKv::shared();
        let window = Duration::from_secs(60);
        let now = 1_700_000_000_000;

        for _ in 0..3 {
            assert!(check_rate_limit(&kv, "ip:1.2.3.4", 3, window, now).await);
        }
        assert!(!check_rate_limit(&kv, "ip:1.2.3.4", 3, window, now).await);
    }

    #[tokio::test]
    async fn test_window_reset_clears_the_count() {
        let kv = MemoryKv::shared();
        let window = Duration::from_secs(60);
        let now = 1_700_000_000_000;

        for _ in 0..4 {
            check_rate_limit(&kv, "ip:1.2.3.4", 3, window, now).await;
        }

        let later = now + window.as_millis() as i64 + 1;
        assert!(check_rate_limit(&kv, "ip:1.2.3.4", 3, window, later).await);
    }

    #[tokio::test]
    async fn test_keys_are_isolated() {
        let kv = MemoryKv::shared();
        let window = Duration::from_secs(60);
        let now = 1_700_000_000_000;

        for _ in 0..4 {
            check_rate_limit(&kv, "ip:1.2.3.4", 3, window, now).await;
        }
        assert!(check_rate_limit(&kv, "ip:5.6.7.8", 3, window, now).await);
    }
}
