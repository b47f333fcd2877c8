//! End-to-end login flows against a real Postgres database.
//!
//! Point `GATEMAN_TEST_DSN` at a disposable database to run these; when the
//! variable is unset every test skips. The schema is created on the fly and
//! each test seeds its own rows under fresh identity hashes, so reruns
//! against the same database are safe.

use base64ct::{Base64, Encoding};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use gateman::crypto::{hash_password, KeyRing};
use gateman::identity::{AdminLogin, AuthConfig, IdentityVerifier, LoginError, WorkerLogin};
use gateman::kv::{KvStore, MemoryKv};

async fn connect() -> Option<PgPool> {
    let Ok(dsn) = std::env::var("GATEMAN_TEST_DSN") else {
        eprintln!("GATEMAN_TEST_DSN not set, skipping");
        return None;
    };

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&dsn)
        .await
        .expect("connecting to GATEMAN_TEST_DSN");

    for ddl in [
        "CREATE TABLE IF NOT EXISTS users (
             id UUID PRIMARY KEY,
             name TEXT NOT NULL,
             name_masked TEXT NOT NULL,
             role TEXT NOT NULL,
             phone_hash TEXT NOT NULL UNIQUE,
             dob_hash TEXT NOT NULL,
             phone_encrypted TEXT,
             dob_encrypted TEXT,
             pii_view_full BOOLEAN NOT NULL DEFAULT false,
             external_worker_id TEXT,
             refresh_token TEXT,
             refresh_token_expires_at TIMESTAMPTZ
         )",
        "CREATE TABLE IF NOT EXISTS audit_logs (
             id UUID PRIMARY KEY,
             action TEXT NOT NULL,
             user_id UUID,
             identity_hash TEXT,
             ip TEXT,
             detail TEXT,
             created_at TIMESTAMPTZ NOT NULL DEFAULT now()
         )",
        "CREATE TABLE IF NOT EXISTS user_devices (
             user_id UUID NOT NULL,
             device_id TEXT NOT NULL,
             last_seen_at TIMESTAMPTZ NOT NULL,
             PRIMARY KEY (user_id, device_id)
         )",
        "CREATE TABLE IF NOT EXISTS attendance_logs (
             id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
             user_id UUID NOT NULL,
             result TEXT NOT NULL,
             checkin_at TIMESTAMPTZ NOT NULL
         )",
    ] {
        sqlx::query(ddl).execute(&pool).await.expect("creating schema");
    }

    Some(pool)
}

fn key_ring() -> Arc<KeyRing> {
    let key = Base64::encode_string(&[7u8; 32]);
    Arc::new(
        KeyRing::new(&key, "hmac-secret", SecretString::from("jwt-secret"))
            .expect("test key ring"),
    )
}

fn verifier(
    pool: PgPool,
    kv: Arc<dyn KvStore>,
    keys: Arc<KeyRing>,
    config: AuthConfig,
) -> IdentityVerifier {
    IdentityVerifier::new(pool, kv, None, keys, config)
}

fn open_config() -> AuthConfig {
    AuthConfig {
        require_attendance: false,
        admin_username: None,
        admin_password_hash: None,
    }
}

/// Phone number no other test run has seen, so seeded rows and lockout
/// records never collide.
fn unique_phone() -> String {
    format!("010{:08}", Uuid::new_v4().as_u128() % 100_000_000)
}

async fn seed_worker(pool: &PgPool, keys: &KeyRing, name: &str, phone: &str, dob: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO users (id, name, name_masked, role, phone_hash, dob_hash, pii_view_full) \
         VALUES ($1, $2, $3, 'WORKER', $4, $5, false)",
    )
    .bind(id)
    .bind(name)
    .bind(name)
    .bind(keys.identity_hash(phone))
    .bind(keys.identity_hash(dob))
    .execute(pool)
    .await
    .expect("seeding worker");
    id
}

fn worker_login(name: &str, phone: &str, dob: &str) -> WorkerLogin {
    WorkerLogin {
        name: name.to_string(),
        phone: phone.to_string(),
        dob: dob.to_string(),
        device_id: None,
    }
}

#[tokio::test]
async fn test_repeated_failures_lock_the_identity() {
    let Some(pool) = connect().await else { return };
    let keys = key_ring();
    let phone = unique_phone();
    let verifier = verifier(pool, MemoryKv::shared(), Arc::clone(&keys), open_config());

    // Four unknown-identity refusals, each from its own address so the
    // per-IP throttle stays out of the way.
    for attempt in 1..5 {
        let ip = format!("203.0.113.{attempt}");
        let err = verifier
            .login_worker(worker_login("홍길동", &phone, "19900101"), Some(&ip))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::NotFound), "attempt {attempt}: {err:?}");
    }

    // The fifth failure locks the identity for 30 minutes.
    let err = verifier
        .login_worker(worker_login("홍길동", &phone, "19900101"), Some("203.0.113.5"))
        .await
        .unwrap_err();
    match err {
        LoginError::Locked { retry_after, .. } => assert_eq!(retry_after, 1800),
        other => panic!("expected lockout on fifth failure, got {other:?}"),
    }

    // Further attempts are refused up front, even with would-be-valid input.
    let err = verifier
        .login_worker(worker_login("홍길동", &phone, "19900101"), Some("203.0.113.6"))
        .await
        .unwrap_err();
    match err {
        LoginError::Locked { retry_after, .. } => {
            assert!((1700..=1800).contains(&retry_after), "retry_after {retry_after}");
        }
        other => panic!("expected lockout to persist, got {other:?}"),
    }
}

#[tokio::test]
async fn test_successful_login_clears_the_lockout_record() {
    let Some(pool) = connect().await else { return };
    let keys = key_ring();
    let kv = MemoryKv::shared();
    let phone = unique_phone();
    let user_id = seed_worker(&pool, &keys, "김철수", &phone, "19900101").await;
    let verifier = verifier(pool, Arc::clone(&kv), Arc::clone(&keys), open_config());

    for attempt in 1..3 {
        let ip = format!("203.0.113.{attempt}");
        let err = verifier
            .login_worker(worker_login("다른이름", &phone, "19900101"), Some(&ip))
            .await
            .unwrap_err();
        assert!(matches!(err, LoginError::NameMismatch));
    }

    let session = verifier
        .login_worker(worker_login("김철수", &phone, "19900101"), Some("203.0.113.9"))
        .await
        .expect("correct credentials after warnings");
    assert_eq!(session.user_id, user_id);
    assert_eq!(session.role, "WORKER");
    // No full-PII clearance, so no phone in the session.
    assert_eq!(session.phone, None);

    let lockout_key = format!("login:lockout:{}", keys.identity_hash(&phone));
    assert_eq!(kv.get(&lockout_key).await, None);
}

#[tokio::test]
async fn test_refresh_rotates_and_reapplies_the_attendance_gate() {
    let Some(pool) = connect().await else { return };
    let keys = key_ring();
    let phone = unique_phone();
    seed_worker(&pool, &keys, "김철수", &phone, "19900101").await;

    let open = verifier(
        pool.clone(),
        MemoryKv::shared(),
        Arc::clone(&keys),
        open_config(),
    );
    let session = open
        .login_worker(worker_login("김철수", &phone, "19900101"), None)
        .await
        .expect("login");

    let renewed = open.refresh(&session.refresh_token, None).await.expect("refresh");
    assert_ne!(renewed.refresh_token, session.refresh_token);

    // The rotated-out token is gone.
    let err = open.refresh(&session.refresh_token, None).await.unwrap_err();
    assert!(matches!(err, LoginError::InvalidRefreshToken));

    // With attendance gating on and no evidence for today, renewal is
    // refused and the refresh token is revoked with it.
    let gated = verifier(
        pool,
        MemoryKv::shared(),
        Arc::clone(&keys),
        AuthConfig {
            require_attendance: true,
            admin_username: None,
            admin_password_hash: None,
        },
    );
    let err = gated.refresh(&renewed.refresh_token, None).await.unwrap_err();
    assert!(matches!(err, LoginError::AttendanceNotVerified));

    let err = gated.refresh(&renewed.refresh_token, None).await.unwrap_err();
    assert!(matches!(err, LoginError::InvalidRefreshToken));
}

#[tokio::test]
async fn test_refresh_token_without_expiry_stays_valid() {
    let Some(pool) = connect().await else { return };
    let keys = key_ring();
    let phone = unique_phone();
    let user_id = seed_worker(&pool, &keys, "김철수", &phone, "19900101").await;

    // Tokens issued before expiry tracking have no expires_at.
    let legacy_token = Uuid::new_v4().to_string();
    sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
        .bind(user_id)
        .bind(&legacy_token)
        .execute(&pool)
        .await
        .expect("seeding legacy refresh token");

    let verifier = verifier(pool, MemoryKv::shared(), Arc::clone(&keys), open_config());
    let session = verifier
        .refresh(&legacy_token, None)
        .await
        .expect("legacy token refresh");
    assert_eq!(session.user_id, user_id);
}

#[tokio::test]
async fn test_admin_login_against_configured_credentials() {
    let Some(pool) = connect().await else { return };
    let keys = key_ring();
    let username = format!("admin-{}", Uuid::new_v4());
    let config = AuthConfig {
        require_attendance: true,
        admin_username: Some(username.clone()),
        admin_password_hash: Some(hash_password("correct horse")),
    };
    let verifier = verifier(pool, MemoryKv::shared(), Arc::clone(&keys), config);

    let err = verifier
        .login_admin(
            AdminLogin {
                username: username.clone(),
                password: "wrong".to_string(),
            },
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LoginError::InvalidCredentials));

    let session = verifier
        .login_admin(
            AdminLogin {
                username,
                password: "correct horse".to_string(),
            },
            None,
        )
        .await
        .expect("admin login");
    assert_eq!(session.role, "SUPER_ADMIN");
}
