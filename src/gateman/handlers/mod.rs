pub mod health;
pub use self::health::health;

pub mod login;
pub use self::login::login;

pub mod admin;
pub use self::admin::admin_login;

pub mod session;
pub use self::session::{logout, refresh};

// common functions for the handlers
use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::error;
use utoipa::ToSchema;

use crate::identity::{LoginError, Session, ACCESS_TOKEN_TTL_SECS};

/// Login responses are padded to this floor so a fast refusal (unknown
/// phone) is not distinguishable from a slow one by timing alone.
pub(crate) const MIN_RESPONSE_TIME: Duration = Duration::from_millis(350);

pub(crate) async fn pad_response_time(started: Instant) {
    let elapsed = started.elapsed();
    if elapsed < MIN_RESPONSE_TIME {
        tokio::time::sleep(MIN_RESPONSE_TIME - elapsed).await;
    }
}

/// Client address as reported by the edge, proxy header first.
pub(crate) fn client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(ip) = headers.get("cf-connecting-ip").and_then(|v| v.to_str().ok()) {
        return Some(ip.to_string());
    }
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|list| list.split(',').next())
        .map(|ip| ip.trim().to_string())
}

pub(crate) fn device_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-device-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Issued session as serialized for clients: the token pair with its
/// lifetime, and the account it belongs to.
#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionPayload {
    pub access_token: String,
    pub refresh_token: String,
    /// Access-token lifetime in seconds.
    pub expires_in: i64,
    pub user: SessionUser,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub role: String,
    pub name: String,
    pub name_masked: String,
}

impl From<Session> for SessionPayload {
    fn from(session: Session) -> Self {
        Self {
            access_token: session.access_token,
            refresh_token: session.refresh_token,
            expires_in: ACCESS_TOKEN_TTL_SECS,
            user: SessionUser {
                id: session.user_id.to_string(),
                phone: session.phone,
                role: session.role,
                name: session.name,
                name_masked: session.name_masked,
            },
        }
    }
}

pub(crate) fn success(data: Value) -> Response {
    Json(json!({
        "success": true,
        "data": data,
        "timestamp": Utc::now().to_rfc3339(),
    }))
    .into_response()
}

pub(crate) fn session_response(session: Session) -> Response {
    match serde_json::to_value(SessionPayload::from(session)) {
        Ok(data) => success(data),
        Err(err) => {
            error!("serializing session failed: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "SERVER_ERROR", "internal error", None)
        }
    }
}

pub(crate) fn error_response(
    status: StatusCode,
    code: &str,
    message: &str,
    extra: Option<Value>,
) -> Response {
    let mut error = json!({
        "code": code,
        "message": message,
    });
    if let (Some(map), Some(Value::Object(extra))) = (error.as_object_mut(), extra) {
        map.extend(extra);
    }

    let body = Json(json!({
        "success": false,
        "error": error,
        "timestamp": Utc::now().to_rfc3339(),
    }));

    (status, body).into_response()
}

/// Maps a verification refusal to its wire shape. Internal errors collapse
/// to an opaque 500 and are logged here, at the edge.
pub(crate) fn login_error_response(err: LoginError) -> Response {
    match err {
        LoginError::MissingFields => error_response(
            StatusCode::BAD_REQUEST,
            "MISSING_FIELDS",
            "required fields are missing",
            None,
        ),
        LoginError::RateLimited => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT_EXCEEDED",
                "too many requests, try again later",
                None,
            );
            response
                .headers_mut()
                .insert("Retry-After", axum::http::HeaderValue::from_static("60"));
            response
        }
        LoginError::Locked {
            locked_until,
            retry_after,
        } => {
            let mut response = error_response(
                StatusCode::TOO_MANY_REQUESTS,
                "ACCOUNT_LOCKED",
                "account temporarily locked",
                Some(json!({ "lockedUntil": locked_until, "retryAfter": retry_after })),
            );
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert("Retry-After", value);
            }
            response
        }
        LoginError::NotFound => error_response(
            StatusCode::UNAUTHORIZED,
            "USER_NOT_FOUND",
            "no account matches the supplied identity",
            None,
        ),
        LoginError::NameMismatch => error_response(
            StatusCode::UNAUTHORIZED,
            "NAME_MISMATCH",
            "name does not match the registered account",
            None,
        ),
        LoginError::InvalidCredentials => error_response(
            StatusCode::UNAUTHORIZED,
            "INVALID_CREDENTIALS",
            "invalid credentials",
            None,
        ),
        LoginError::AttendanceNotVerified => error_response(
            StatusCode::FORBIDDEN,
            "ATTENDANCE_NOT_VERIFIED",
            "attendance not verified for today",
            None,
        ),
        LoginError::InvalidRefreshToken => error_response(
            StatusCode::UNAUTHORIZED,
            "INVALID_REFRESH_TOKEN",
            "invalid refresh token",
            None,
        ),
        LoginError::RefreshTokenExpired => error_response(
            StatusCode::UNAUTHORIZED,
            "REFRESH_TOKEN_EXPIRED",
            "refresh token expired, log in again",
            None,
        ),
        LoginError::AdminNotConfigured => {
            error!("admin login attempted without configured credentials");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERVER_ERROR",
                "internal error",
                None,
            )
        }
        LoginError::Internal(err) => {
            error!("login failed: {err:#}");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "SERVER_ERROR",
                "internal error",
                None,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_client_ip_prefers_edge_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert("cf-connecting-ip", HeaderValue::from_static("203.0.113.9"));

        assert_eq!(client_ip(&headers).as_deref(), Some("203.0.113.9"));
    }

    #[test]
    fn test_client_ip_takes_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));

        assert_eq!(client_ip(&headers).as_deref(), Some("10.0.0.1"));
        assert_eq!(client_ip(&HeaderMap::new()), None);
    }

    #[test]
    fn test_session_payload_shape() {
        let now = Utc::now();
        let session = Session {
            user_id: uuid::Uuid::nil(),
            name: "김철수".to_string(),
            name_masked: "김*수".to_string(),
            role: "WORKER".to_string(),
            phone: None,
            access_token: "header.claims.signature".to_string(),
            refresh_token: "refresh".to_string(),
            refresh_token_expires_at: now + chrono::Duration::days(30),
            login_date: "2026-03-10".to_string(),
        };

        let value = serde_json::to_value(SessionPayload::from(session)).unwrap();
        assert_eq!(value["accessToken"], "header.claims.signature");
        assert_eq!(value["refreshToken"], "refresh");
        assert_eq!(value["expiresIn"], 86_400);
        assert_eq!(
            value["user"]["id"],
            "00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(value["user"]["role"], "WORKER");
        assert_eq!(value["user"]["name"], "김철수");
        assert_eq!(value["user"]["nameMasked"], "김*수");
        // Phone stays off the wire for accounts without full PII visibility.
        assert!(value["user"].get("phone").is_none());
    }
}
