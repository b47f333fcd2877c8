//! Login orchestration: rate limiting, lockout, roster enrichment,
//! attendance gating and token issuance in one place.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, TimeZone, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{verify_password, KeyRing};
use crate::fas::{attendance_day, FasError, FasGateway};
use crate::identity::audit::{
    self, AuditEvent, ACTION_LOGIN_FAILED, ACTION_LOGIN_LOCKOUT, ACTION_LOGIN_SUCCESS,
};
use crate::identity::error::LoginError;
use crate::identity::ratelimit::check_rate_limit;
use crate::identity::sync::{dob_matches, social_no_to_dob, sync_fas_employee};
use crate::identity::token::{issue_access_token, REFRESH_TOKEN_TTL_DAYS};
use crate::identity::users::{User, UserRepo};
use crate::kv::KvStore;
use crate::lockout::{retry_after_seconds, LockoutLedger};

const LOGIN_RATE_LIMIT: u32 = 5;
const REFRESH_RATE_LIMIT: u32 = 10;
const RATE_WINDOW: Duration = Duration::from_secs(60);

const KST_OFFSET_SECS: i32 = 9 * 3600;
const DAY_CUTOVER_HOUR: u32 = 5;

const ROLE_WORKER: &str = "WORKER";

pub struct WorkerLogin {
    pub name: String,
    pub phone: String,
    pub dob: String,
    pub device_id: Option<String>,
}

pub struct AdminLogin {
    pub username: String,
    pub password: String,
}

/// Verification policy and admin bootstrap credentials, from configuration.
pub struct AuthConfig {
    /// When set, worker logins require same-day attendance evidence.
    pub require_attendance: bool,
    pub admin_username: Option<String>,
    pub admin_password_hash: Option<String>,
}

/// An issued session, ready to serialize for the client.
#[derive(Debug)]
pub struct Session {
    pub user_id: Uuid,
    pub name: String,
    pub name_masked: String,
    pub role: String,
    /// Decrypted phone number, present only for accounts cleared to see
    /// unmasked PII.
    pub phone: Option<String>,
    pub access_token: String,
    pub refresh_token: String,
    pub refresh_token_expires_at: DateTime<Utc>,
    pub login_date: String,
}

pub struct IdentityVerifier {
    pool: PgPool,
    kv: Arc<dyn KvStore>,
    fas: Option<Arc<FasGateway>>,
    keys: Arc<KeyRing>,
    lockout: LockoutLedger,
    config: AuthConfig,
}

impl IdentityVerifier {
    #[must_use]
    pub fn new(
        pool: PgPool,
        kv: Arc<dyn KvStore>,
        fas: Option<Arc<FasGateway>>,
        keys: Arc<KeyRing>,
        config: AuthConfig,
    ) -> Self {
        let lockout = LockoutLedger::new(Arc::clone(&kv));
        Self {
            pool,
            kv,
            fas,
            keys,
            lockout,
            config,
        }
    }

    /// Worker login: name + phone + birth date against the local account
    /// store, enriched from the site roster and gated on attendance.
    ///
    /// # Errors
    /// Every deliberate refusal is a distinct [`LoginError`] variant;
    /// infrastructure trouble surfaces as [`LoginError::Internal`].
    pub async fn login_worker(
        &self,
        input: WorkerLogin,
        ip: Option<&str>,
    ) -> Result<Session, LoginError> {
        let name = input.name.trim().to_string();
        let phone: String = input.phone.chars().filter(char::is_ascii_digit).collect();
        let dob: String = input.dob.chars().filter(char::is_ascii_digit).collect();
        if name.is_empty() || phone.is_empty() || dob.is_empty() {
            return Err(LoginError::MissingFields);
        }

        let now = Utc::now();
        let now_ms = now.timestamp_millis();
        self.enforce_rate_limit("login", ip, LOGIN_RATE_LIMIT, now_ms)
            .await?;

        let phone_hash = self.keys.identity_hash(&phone);
        let lockout_state = self.lockout.status(&phone_hash, now_ms).await;
        if let Some(record) = &lockout_state {
            if record.is_locked(now_ms) {
                let locked_until = record.locked_until.unwrap_or(now_ms);
                self.audit(ACTION_LOGIN_LOCKOUT, None, Some(&phone_hash), ip, None);
                return Err(LoginError::Locked {
                    locked_until,
                    retry_after: retry_after_seconds(locked_until, now_ms),
                });
            }
        }

        // Roster enrichment keeps the local account current and resolves a
        // short birth date to the full one. Roster trouble never blocks a
        // login attempt.
        let mut full_dob: Option<String> = None;
        if let Some(fas) = &self.fas {
            match fas.employee_by_phone(&phone).await {
                Ok(Some(employee)) => {
                    if let Some(roster_dob) = social_no_to_dob(&employee.social_no) {
                        if dob_matches(&dob, &roster_dob) {
                            full_dob = Some(roster_dob);
                            if let Err(err) =
                                sync_fas_employee(&self.pool, &self.keys, &employee).await
                            {
                                warn!("roster sync failed: {err}");
                            }
                        }
                    }
                }
                Ok(None) => debug!("phone not on the site roster"),
                Err(err) => warn!("roster lookup failed: {err}"),
            }
        }

        let user = self
            .find_worker(&phone_hash, &dob, full_dob.as_deref())
            .await?;
        let Some(user) = user else {
            return Err(self
                .register_failure(&phone_hash, lockout_state.as_ref(), now_ms, ip, "user not found")
                .await
                .unwrap_or(LoginError::NotFound));
        };

        if user.name.trim().to_lowercase() != name.to_lowercase() {
            return Err(self
                .register_failure(&phone_hash, lockout_state.as_ref(), now_ms, ip, "name mismatch")
                .await
                .unwrap_or(LoginError::NameMismatch));
        }

        self.backfill_encrypted(&user, &phone, full_dob.as_deref().unwrap_or(&dob));

        if self.config.require_attendance && user.role == ROLE_WORKER {
            self.verify_attendance(&user, now).await?;
        }

        let session = self.issue_session(&user, &phone, now).await?;

        if let Some(device_id) = input.device_id.as_deref().filter(|id| !id.is_empty()) {
            let pool = self.pool.clone();
            let user_id = user.id;
            let device_id = device_id.to_string();
            tokio::spawn(async move {
                if let Err(err) = UserRepo::upsert_device(&pool, user_id, &device_id).await {
                    warn!("device upsert failed: {err}");
                }
            });
        }

        self.lockout.clear(&phone_hash).await;
        self.audit(ACTION_LOGIN_SUCCESS, Some(user.id), Some(&phone_hash), ip, None);
        Ok(session)
    }

    /// Admin login against configured credentials. Admin accounts skip the
    /// lockout ledger; the per-IP rate limit is the only throttle.
    ///
    /// # Errors
    /// [`LoginError::AdminNotConfigured`] when no admin credentials are
    /// configured, [`LoginError::InvalidCredentials`] on a mismatch.
    pub async fn login_admin(
        &self,
        input: AdminLogin,
        ip: Option<&str>,
    ) -> Result<Session, LoginError> {
        let username = input.username.trim();
        if username.is_empty() || input.password.is_empty() {
            return Err(LoginError::MissingFields);
        }

        let now = Utc::now();
        self.enforce_rate_limit("admin", ip, LOGIN_RATE_LIMIT, now.timestamp_millis())
            .await?;

        let (Some(expected_username), Some(password_hash)) = (
            self.config.admin_username.as_deref(),
            self.config.admin_password_hash.as_deref(),
        ) else {
            return Err(LoginError::AdminNotConfigured);
        };

        let username_hash = self.keys.identity_hash(username);
        if username != expected_username || !verify_password(&input.password, password_hash) {
            self.audit(
                ACTION_LOGIN_FAILED,
                None,
                Some(&username_hash),
                ip,
                Some("admin credentials rejected"),
            );
            return Err(LoginError::InvalidCredentials);
        }

        let user = match UserRepo::find_super_admin(&self.pool, &username_hash).await? {
            Some(user) => user,
            None => UserRepo::insert_super_admin(&self.pool, &username_hash).await?,
        };

        let session = self.issue_session(&user, "", now).await?;
        self.audit(ACTION_LOGIN_SUCCESS, Some(user.id), Some(&username_hash), ip, None);
        Ok(session)
    }

    /// Exchanges a live refresh token for a fresh session; the refresh
    /// token rotates on every use.
    ///
    /// # Errors
    /// An unknown token is [`LoginError::InvalidRefreshToken`]; a known but
    /// elapsed one is [`LoginError::RefreshTokenExpired`] and is revoked.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip: Option<&str>,
    ) -> Result<Session, LoginError> {
        if refresh_token.is_empty() {
            return Err(LoginError::MissingFields);
        }

        let now = Utc::now();
        self.enforce_rate_limit("refresh", ip, REFRESH_RATE_LIMIT, now.timestamp_millis())
            .await?;

        let user = UserRepo::find_by_refresh_token(&self.pool, refresh_token)
            .await?
            .ok_or(LoginError::InvalidRefreshToken)?;

        // A stored token without an expiry predates expiry tracking and
        // stays valid until rotated or revoked.
        if let Some(expires_at) = user.refresh_token_expires_at {
            if expires_at <= now {
                UserRepo::clear_refresh_token(&self.pool, user.id).await?;
                return Err(LoginError::RefreshTokenExpired);
            }
        }

        // Renewal re-applies the attendance gate: a session issued on an
        // attended day must not carry a worker through days they never
        // showed up. A refusal here also revokes the refresh token.
        if self.config.require_attendance && user.role == ROLE_WORKER {
            if let Err(err) = self.verify_attendance(&user, now).await {
                if matches!(err, LoginError::AttendanceNotVerified) {
                    UserRepo::clear_refresh_token(&self.pool, user.id).await?;
                }
                return Err(err);
            }
        }

        let phone = self.decrypted_phone(&user).unwrap_or_default();
        self.issue_session(&user, &phone, now).await
    }

    /// Revokes the session behind a refresh token. Idempotent: an unknown
    /// token is not an error, the session it named is gone either way.
    ///
    /// # Errors
    /// Only on database failure.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), LoginError> {
        if refresh_token.is_empty() {
            return Ok(());
        }
        if let Some(user) = UserRepo::find_by_refresh_token(&self.pool, refresh_token).await? {
            UserRepo::clear_refresh_token(&self.pool, user.id).await?;
        }
        Ok(())
    }

    async fn enforce_rate_limit(
        &self,
        scope: &str,
        ip: Option<&str>,
        limit: u32,
        now_ms: i64,
    ) -> Result<(), LoginError> {
        let key = format!("{scope}:{}", ip.unwrap_or("unknown"));
        if check_rate_limit(&self.kv, &key, limit, RATE_WINDOW, now_ms).await {
            Ok(())
        } else {
            Err(LoginError::RateLimited)
        }
    }

    /// Looks the worker up by identity hashes. A short birth date without a
    /// roster match is ambiguous about the century, so both are tried.
    async fn find_worker(
        &self,
        phone_hash: &str,
        dob: &str,
        full_dob: Option<&str>,
    ) -> Result<Option<User>, LoginError> {
        for candidate in dob_candidates(dob, full_dob) {
            let dob_hash = self.keys.identity_hash(&candidate);
            if let Some(user) =
                UserRepo::find_by_identity_hashes(&self.pool, phone_hash, &dob_hash).await?
            {
                return Ok(Some(user));
            }
        }
        Ok(None)
    }

    /// Records a failed attempt and maps it to the error the caller should
    /// see: [`LoginError::Locked`] when this failure crossed the threshold.
    async fn register_failure(
        &self,
        phone_hash: &str,
        current: Option<&crate::lockout::LockoutRecord>,
        now_ms: i64,
        ip: Option<&str>,
        reason: &str,
    ) -> Option<LoginError> {
        let record = self.lockout.record_failure(phone_hash, current, now_ms).await;
        if let Some(locked_until) = record.locked_until {
            self.audit(ACTION_LOGIN_LOCKOUT, None, Some(phone_hash), ip, Some(reason));
            return Some(LoginError::Locked {
                locked_until,
                retry_after: retry_after_seconds(locked_until, now_ms),
            });
        }
        self.audit(ACTION_LOGIN_FAILED, None, Some(phone_hash), ip, Some(reason));
        None
    }

    /// Attendance gate. When the roster applies (FAS configured and the
    /// account linked to it), its verdict is final: explicit absence fails
    /// closed and only an unreadable source fails open. Local check-ins
    /// decide only when the roster does not apply.
    async fn verify_attendance(&self, user: &User, now: DateTime<Utc>) -> Result<(), LoginError> {
        let accs_day = attendance_day(now);

        if let (Some(fas), Some(empl_cd)) = (&self.fas, user.external_worker_id.as_deref()) {
            let outcome = fas
                .check_worker_attendance(empl_cd, &accs_day)
                .await
                .map(|result| result.has_attendance);
            return if external_gate(outcome) {
                Ok(())
            } else {
                Err(LoginError::AttendanceNotVerified)
            };
        }

        if let Some((start, end)) = local_attendance_window(&accs_day) {
            if UserRepo::has_local_attendance(&self.pool, user.id, start, end).await? {
                return Ok(());
            }
        }
        Err(LoginError::AttendanceNotVerified)
    }

    /// Fire-and-forget backfill of the encrypted identity columns for
    /// accounts created before envelope encryption.
    fn backfill_encrypted(&self, user: &User, phone: &str, dob: &str) {
        if user.phone_encrypted.is_some() {
            return;
        }
        let (Ok(phone_encrypted), Ok(dob_encrypted)) =
            (self.keys.encrypt_pii(phone), self.keys.encrypt_pii(dob))
        else {
            warn!("encrypting identity fields for backfill failed");
            return;
        };

        let pool = self.pool.clone();
        let user_id = user.id;
        tokio::spawn(async move {
            if let Err(err) =
                UserRepo::backfill_encrypted(&pool, user_id, &phone_encrypted, &dob_encrypted).await
            {
                warn!("identity backfill failed: {err}");
            }
        });
    }

    async fn issue_session(
        &self,
        user: &User,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<Session, LoginError> {
        // The phone claim is withheld from sessions without full PII
        // visibility, same as the response payload.
        let visible_phone = if user.pii_view_full {
            self.decrypted_phone(user)
                .or_else(|| (!phone.is_empty()).then(|| phone.to_string()))
        } else {
            None
        };

        let access_token = issue_access_token(
            self.keys.jwt_secret(),
            &user.id.to_string(),
            visible_phone.as_deref().unwrap_or_default(),
            &user.role,
            now,
        )?;

        let refresh_token = Uuid::new_v4().to_string();
        let refresh_token_expires_at = now + ChronoDuration::days(REFRESH_TOKEN_TTL_DAYS);
        UserRepo::rotate_refresh_token(
            &self.pool,
            user.id,
            &refresh_token,
            refresh_token_expires_at,
        )
        .await?;

        Ok(Session {
            user_id: user.id,
            name: user.name.clone(),
            name_masked: user.name_masked.clone(),
            role: user.role.clone(),
            phone: visible_phone,
            access_token,
            refresh_token,
            refresh_token_expires_at,
            login_date: crate::identity::token::kst_date_string(now),
        })
    }

    fn decrypted_phone(&self, user: &User) -> Option<String> {
        let envelope = user.phone_encrypted.as_deref()?;
        match self.keys.decrypt_pii(envelope) {
            Ok(phone) => Some(phone),
            Err(err) => {
                warn!(user = %user.id, "stored phone failed to decrypt: {err}");
                None
            }
        }
    }

    fn audit(
        &self,
        action: &'static str,
        user_id: Option<Uuid>,
        identity_hash: Option<&str>,
        ip: Option<&str>,
        detail: Option<&str>,
    ) {
        audit::record(
            &self.pool,
            AuditEvent {
                action,
                user_id,
                identity_hash: identity_hash.map(str::to_string),
                ip: ip.map(str::to_string),
                detail: detail.map(str::to_string),
            },
        );
    }
}

/// Birth-date hash candidates for lookup, most specific first.
fn dob_candidates(dob: &str, full_dob: Option<&str>) -> Vec<String> {
    if let Some(full) = full_dob {
        return vec![full.to_string()];
    }
    match dob.len() {
        8 => vec![dob.to_string()],
        6 => vec![format!("19{dob}"), format!("20{dob}")],
        _ => Vec::new(),
    }
}

/// Maps an external attendance outcome to an allow/refuse decision. A
/// readable verdict stands as-is; an unreadable source fails open so a
/// roster outage cannot lock the whole site out.
fn external_gate(outcome: Result<bool, FasError>) -> bool {
    match outcome {
        Ok(present) => present,
        Err(err) => {
            warn!("attendance check unavailable, allowing login: {err}");
            true
        }
    }
}

/// UTC bounds of one attendance day: 05:00 KST to 05:00 KST the next day.
fn local_attendance_window(accs_day: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    let date = NaiveDate::parse_from_str(accs_day, "%Y%m%d").ok()?;
    let offset = FixedOffset::east_opt(KST_OFFSET_SECS)?;
    let start_local = date.and_hms_opt(DAY_CUTOVER_HOUR, 0, 0)?;
    let start = offset
        .from_local_datetime(&start_local)
        .single()?
        .with_timezone(&Utc);
    Some((start, start + ChronoDuration::hours(24)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dob_candidates_prefers_roster_date() {
        assert_eq!(dob_candidates("900101", Some("19900101")), ["19900101"]);
        assert_eq!(dob_candidates("19900101", None), ["19900101"]);
        assert_eq!(dob_candidates("900101", None), ["19900101", "20900101"]);
        assert!(dob_candidates("9001", None).is_empty());
    }

    #[test]
    fn test_local_attendance_window_spans_kst_day() {
        let (start, end) = local_attendance_window("20260310").unwrap();

        // 05:00 KST on 2026-03-10 is 20:00 UTC on 2026-03-09.
        assert_eq!(start.to_rfc3339(), "2026-03-09T20:00:00+00:00");
        assert_eq!(end - start, ChronoDuration::hours(24));
    }

    #[test]
    fn test_local_attendance_window_rejects_garbage() {
        assert!(local_attendance_window("not-a-day").is_none());
    }

    #[test]
    fn test_external_attendance_verdict_is_final() {
        assert!(external_gate(Ok(true)));
        // A definite "absent" refuses without consulting anything else.
        assert!(!external_gate(Ok(false)));
        // An unreadable roster fails open.
        assert!(external_gate(Err(FasError::AllSourcesFailed)));
    }
}
