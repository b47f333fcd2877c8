//! Failed-login lockout ledger.
//!
//! Per identity hash, the ledger walks Clear → Warned → Locked: failures
//! increment a counter with a short TTL, the fifth failure locks the
//! identity for 30 minutes, a successful login deletes the record. Locks
//! expire lazily: any read past `lockedUntil` deletes the record and
//! reports Clear.
//!
//! The increment is read-modify-write, not atomic. Two concurrent failures
//! can both observe the same pre-increment count and under-count by one.
//! That lost-update window is an accepted trade-off of the KV contract; a
//! backing store with atomic increment could close it, but doing so changes
//! the observable threshold under concurrent attack load.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::kv::KvStore;

pub const MAX_ATTEMPTS: u32 = 5;
pub const ATTEMPT_TTL: Duration = Duration::from_secs(15 * 60);
pub const LOCKOUT_TTL: Duration = Duration::from_secs(30 * 60);

const KEY_PREFIX: &str = "login:lockout:";

/// Durable JSON record: `{"attempts":n}` while warned,
/// `{"attempts":n,"lockedUntil":ms}` while locked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockoutRecord {
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<i64>,
}

impl LockoutRecord {
    #[must_use]
    pub fn is_locked(&self, now_ms: i64) -> bool {
        self.locked_until.is_some_and(|until| until > now_ms)
    }

    fn is_expired_lock(&self, now_ms: i64) -> bool {
        self.locked_until.is_some_and(|until| until <= now_ms)
    }
}

/// Seconds a caller should wait before retrying, never less than one.
#[must_use]
pub fn retry_after_seconds(locked_until: i64, now_ms: i64) -> i64 {
    ((locked_until - now_ms).max(1000) + 999) / 1000
}

pub struct LockoutLedger {
    kv: Arc<dyn KvStore>,
}

impl LockoutLedger {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    fn key(identity_hash: &str) -> String {
        format!("{KEY_PREFIX}{identity_hash}")
    }

    /// Current record for an identity, with lazy expiry: an elapsed lock is
    /// deleted and reported as absent. A record that fails to parse is also
    /// treated as absent, failing open on ledger corruption.
    pub async fn status(&self, identity_hash: &str, now_ms: i64) -> Option<LockoutRecord> {
        let key = Self::key(identity_hash);
        let record: LockoutRecord = serde_json::from_str(&self.kv.get(&key).await?).ok()?;

        if record.is_expired_lock(now_ms) {
            self.kv.delete(&key).await;
            return None;
        }
        Some(record)
    }

    /// Records a failed attempt on top of the caller's last observed state
    /// and returns the updated record. Crossing [`MAX_ATTEMPTS`] sets
    /// `lockedUntil` and stretches the TTL to the lockout duration.
    pub async fn record_failure(
        &self,
        identity_hash: &str,
        current: Option<&LockoutRecord>,
        now_ms: i64,
    ) -> LockoutRecord {
        let attempts = current.map_or(0, |record| record.attempts) + 1;

        let (record, ttl) = if attempts >= MAX_ATTEMPTS {
            (
                LockoutRecord {
                    attempts,
                    locked_until: Some(now_ms + LOCKOUT_TTL.as_millis() as i64),
                },
                LOCKOUT_TTL,
            )
        } else {
            (
                LockoutRecord {
                    attempts,
                    locked_until: None,
                },
                ATTEMPT_TTL,
            )
        };

        let payload = serde_json::to_string(&record).unwrap_or_default();
        self.kv
            .put(&Self::key(identity_hash), payload, Some(ttl))
            .await;
        record
    }

    /// Successful login: back to Clear from any state.
    pub async fn clear(&self, identity_hash: &str) {
        self.kv.delete(&Self::key(identity_hash)).await;
    }
}
