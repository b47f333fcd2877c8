use thiserror::Error;

/// Verification outcomes that are part of the login contract, plus the
/// internal bucket for everything that is not.
///
/// The distinct variants exist because clients render them differently and
/// the audit trail records which one happened; everything in `Internal`
/// collapses to an opaque server error at the edge.
#[derive(Debug, Error)]
pub enum LoginError {
    #[error("required fields are missing")]
    MissingFields,
    #[error("too many requests")]
    RateLimited,
    #[error("account locked until {locked_until}")]
    Locked {
        /// Unix millis when the lock elapses.
        locked_until: i64,
        /// Whole seconds the caller should wait, at least one.
        retry_after: i64,
    },
    #[error("no account matches the supplied identity")]
    NotFound,
    #[error("name does not match the registered account")]
    NameMismatch,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("attendance not verified for today")]
    AttendanceNotVerified,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshTokenExpired,
    #[error("admin login is not configured")]
    AdminNotConfigured,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
