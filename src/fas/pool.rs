use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::fas::source::FasTarget;
use crate::fas::FasError;

/// Cached entries older than this are evicted; legacy MariaDB servers drop
/// idle connections aggressively, so holding them longer buys nothing.
const ENTRY_TTL: Duration = Duration::from_secs(30);
const PING_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

struct CachedPool {
    pool: MySqlPool,
    last_used: Instant,
}

/// Connection cache keyed by `host:port`, one pool per server with a hard
/// cap of one live connection. Reused entries are health-checked with a
/// bounded ping; a stale or dead entry is closed and replaced.
pub struct FasPool {
    cache: Mutex<HashMap<String, CachedPool>>,
}

impl Default for FasPool {
    fn default() -> Self {
        Self::new()
    }
}

impl FasPool {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Returns a healthy pool for the target, reusing the cached one when
    /// its ping succeeds. The cache lock is not held across the ping or the
    /// connect, so one slow server cannot stall borrows for other targets.
    pub async fn acquire(&self, target: &FasTarget) -> Result<MySqlPool, FasError> {
        let key = target.pool_key();

        let cached = {
            let mut cache = self.cache.lock().await;
            let fresh = match cache.get(&key) {
                Some(entry) if entry.last_used.elapsed() < ENTRY_TTL => Some(entry.pool.clone()),
                _ => None,
            };
            if fresh.is_none() {
                if let Some(stale) = cache.remove(&key) {
                    tokio::spawn(async move { stale.pool.close().await });
                }
            }
            fresh
        };

        if let Some(pool) = cached {
            if ping(&pool).await {
                let mut cache = self.cache.lock().await;
                if let Some(entry) = cache.get_mut(&key) {
                    entry.last_used = Instant::now();
                }
                return Ok(pool);
            }
            debug!(target = %key, "cached FAS connection failed ping, reconnecting");
            let mut cache = self.cache.lock().await;
            if let Some(dead) = cache.remove(&key) {
                tokio::spawn(async move { dead.pool.close().await });
            }
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(CONNECT_TIMEOUT)
            .connect_with(target.connect_options())
            .await
            .map_err(FasError::Connect)?;

        let mut cache = self.cache.lock().await;
        if let Some(displaced) = cache.insert(
            key,
            CachedPool {
                pool: pool.clone(),
                last_used: Instant::now(),
            },
        ) {
            // A concurrent acquire connected first; keep the newest and
            // close the displaced pool off the hot path.
            tokio::spawn(async move { displaced.pool.close().await });
        }

        Ok(pool)
    }

    /// Evicts and closes every entry idle past the TTL.
    pub async fn sweep(&self) {
        let expired: Vec<(String, CachedPool)> = {
            let mut cache = self.cache.lock().await;
            let keys: Vec<String> = cache
                .iter()
                .filter(|(_, entry)| entry.last_used.elapsed() >= ENTRY_TTL)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| cache.remove(&key).map(|entry| (key, entry)))
                .collect()
        };

        for (key, entry) in expired {
            debug!(target = %key, "closing idle FAS connection");
            entry.pool.close().await;
        }
    }

    /// Closes every cached connection; used at shutdown.
    pub async fn close_all(&self) {
        let drained: Vec<CachedPool> = {
            let mut cache = self.cache.lock().await;
            cache.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            entry.pool.close().await;
        }
    }
}

async fn ping(pool: &MySqlPool) -> bool {
    match tokio::time::timeout(PING_TIMEOUT, sqlx::query("SELECT 1").execute(pool)).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            warn!("FAS ping failed: {err}");
            false
        }
        Err(_) => {
            warn!("FAS ping timed out after {PING_TIMEOUT:?}");
            false
        }
    }
}
