use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const USER_COLUMNS: &str = "id, name, name_masked, role, phone_hash, dob_hash, \
     phone_encrypted, dob_encrypted, pii_view_full, external_worker_id, \
     refresh_token, refresh_token_expires_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub name_masked: String,
    pub role: String,
    pub phone_hash: String,
    pub dob_hash: String,
    pub phone_encrypted: Option<String>,
    pub dob_encrypted: Option<String>,
    /// Whether sessions for this user may carry the decrypted phone number.
    pub pii_view_full: bool,
    /// FAS employee code, when the account was linked to the site roster.
    pub external_worker_id: Option<String>,
    pub refresh_token: Option<String>,
    pub refresh_token_expires_at: Option<DateTime<Utc>>,
}

/// Account synchronized from the external roster; inserted or refreshed on
/// login when FAS knows the phone number.
pub struct ExternalEmployee {
    pub name: String,
    pub name_masked: String,
    pub phone_hash: String,
    pub dob_hash: String,
    pub phone_encrypted: String,
    pub dob_encrypted: String,
    pub external_worker_id: String,
}

pub struct UserRepo;

impl UserRepo {
    pub async fn find_by_identity_hashes(
        pool: &PgPool,
        phone_hash: &str,
        dob_hash: &str,
    ) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE phone_hash = $1 AND dob_hash = $2"
        ))
        .bind(phone_hash)
        .bind(dob_hash)
        .fetch_optional(pool)
        .await
        .context("querying user by identity hashes")
    }

    pub async fn find_by_refresh_token(pool: &PgPool, refresh_token: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE refresh_token = $1"
        ))
        .bind(refresh_token)
        .fetch_optional(pool)
        .await
        .context("querying user by refresh token")
    }

    pub async fn find_super_admin(pool: &PgPool, username_hash: &str) -> Result<Option<User>> {
        sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE role = 'SUPER_ADMIN' AND phone_hash = $1"
        ))
        .bind(username_hash)
        .fetch_optional(pool)
        .await
        .context("querying super admin")
    }

    /// First admin login provisions the account row.
    pub async fn insert_super_admin(pool: &PgPool, username_hash: &str) -> Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, name_masked, role, phone_hash, dob_hash, pii_view_full) \
             VALUES ($1, 'Administrator', 'Admin', 'SUPER_ADMIN', $2, '', true) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(username_hash)
        .fetch_one(pool)
        .await
        .context("provisioning super admin")
    }

    /// Inserts a roster account or refreshes an existing one matched by
    /// phone hash, returning the canonical row either way.
    pub async fn upsert_external_employee(
        pool: &PgPool,
        employee: &ExternalEmployee,
    ) -> Result<User> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (id, name, name_masked, role, phone_hash, dob_hash, \
                                phone_encrypted, dob_encrypted, pii_view_full, external_worker_id) \
             VALUES ($1, $2, $3, 'WORKER', $4, $5, $6, $7, false, $8) \
             ON CONFLICT (phone_hash) DO UPDATE SET \
                 name = EXCLUDED.name, \
                 name_masked = EXCLUDED.name_masked, \
                 dob_hash = EXCLUDED.dob_hash, \
                 phone_encrypted = EXCLUDED.phone_encrypted, \
                 dob_encrypted = EXCLUDED.dob_encrypted, \
                 external_worker_id = EXCLUDED.external_worker_id \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(&employee.name)
        .bind(&employee.name_masked)
        .bind(&employee.phone_hash)
        .bind(&employee.dob_hash)
        .bind(&employee.phone_encrypted)
        .bind(&employee.dob_encrypted)
        .bind(&employee.external_worker_id)
        .fetch_one(pool)
        .await
        .context("upserting external employee")
    }

    pub async fn rotate_refresh_token(
        pool: &PgPool,
        user_id: Uuid,
        refresh_token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET refresh_token = $2, refresh_token_expires_at = $3 WHERE id = $1",
        )
        .bind(user_id)
        .bind(refresh_token)
        .bind(expires_at)
        .execute(pool)
        .await
        .context("rotating refresh token")?;
        Ok(())
    }

    pub async fn clear_refresh_token(pool: &PgPool, user_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_token_expires_at = NULL WHERE id = $1",
        )
        .bind(user_id)
        .execute(pool)
        .await
        .context("clearing refresh token")?;
        Ok(())
    }

    /// Accounts that pre-date envelope encryption carry hashes but no
    /// ciphertext; the login path backfills them opportunistically.
    pub async fn backfill_encrypted(
        pool: &PgPool,
        user_id: Uuid,
        phone_encrypted: &str,
        dob_encrypted: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE users SET phone_encrypted = $2, dob_encrypted = $3 \
             WHERE id = $1 AND phone_encrypted IS NULL",
        )
        .bind(user_id)
        .bind(phone_encrypted)
        .bind(dob_encrypted)
        .execute(pool)
        .await
        .context("backfilling encrypted identity fields")?;
        Ok(())
    }

    /// Did this user check in locally (kiosk/beacon) within the window?
    pub async fn has_local_attendance(
        pool: &PgPool,
        user_id: Uuid,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<bool> {
        let found: Option<(Uuid,)> = sqlx::query_as(
            "SELECT user_id FROM attendance_logs \
             WHERE user_id = $1 AND result = 'SUCCESS' \
               AND checkin_at >= $2 AND checkin_at < $3 \
             LIMIT 1",
        )
        .bind(user_id)
        .bind(window_start)
        .bind(window_end)
        .fetch_optional(pool)
        .await
        .context("querying local attendance")?;
        Ok(found.is_some())
    }

    /// Remembers the device a user last logged in from.
    pub async fn upsert_device(pool: &PgPool, user_id: Uuid, device_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_devices (user_id, device_id, last_seen_at) \
             VALUES ($1, $2, now()) \
             ON CONFLICT (user_id, device_id) DO UPDATE SET last_seen_at = now()",
        )
        .bind(user_id)
        .bind(device_id)
        .execute(pool)
        .await
        .context("recording login device")?;
        Ok(())
    }
}
