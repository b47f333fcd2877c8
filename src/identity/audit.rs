//! Login audit trail.
//!
//! Audit writes are fire-and-forget: a login must not fail or slow down
//! because the audit insert did. Failures are logged and dropped.

use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

pub const ACTION_LOGIN_SUCCESS: &str = "LOGIN_SUCCESS";
pub const ACTION_LOGIN_FAILED: &str = "LOGIN_FAILED";
pub const ACTION_LOGIN_LOCKOUT: &str = "LOGIN_LOCKOUT";

pub struct AuditEvent {
    pub action: &'static str,
    pub user_id: Option<Uuid>,
    /// Identity hash for events with no resolved account.
    pub identity_hash: Option<String>,
    pub ip: Option<String>,
    pub detail: Option<String>,
}

pub fn record(pool: &PgPool, event: AuditEvent) {
    let pool = pool.clone();
    tokio::spawn(async move {
        let result = sqlx::query(
            "INSERT INTO audit_logs (id, action, user_id, identity_hash, ip, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, now())",
        )
        .bind(Uuid::new_v4())
        .bind(event.action)
        .bind(event.user_id)
        .bind(&event.identity_hash)
        .bind(&event.ip)
        .bind(&event.detail)
        .execute(&pool)
        .await;

        if let Err(err) = result {
            error!(action = event.action, "audit insert failed: {err}");
        }
    });
}
