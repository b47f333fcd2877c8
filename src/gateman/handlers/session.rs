use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::gateman::handlers::{
    client_ip, login_error_response, session_response, success, SessionPayload,
};
use crate::identity::IdentityVerifier;

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session renewed", body = SessionPayload),
        (status = 401, description = "Refresh token rejected"),
        (status = 429, description = "Rate limited"),
    ),
    tag = "auth",
)]
/// Exchanges a refresh token for a fresh session; the token rotates.
pub async fn refresh(
    verifier: Extension<Arc<IdentityVerifier>>,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> impl IntoResponse {
    let ip = client_ip(&headers);

    match verifier.refresh(&body.refresh_token, ip.as_deref()).await {
        Ok(session) => session_response(session),
        Err(err) => login_error_response(err),
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Session revoked"),
    ),
    tag = "auth",
)]
/// Revokes the session behind a refresh token; idempotent.
pub async fn logout(
    verifier: Extension<Arc<IdentityVerifier>>,
    Json(body): Json<LogoutRequest>,
) -> impl IntoResponse {
    match verifier.logout(&body.refresh_token).await {
        Ok(()) => success(json!({ "loggedOut": true })),
        Err(err) => login_error_response(err),
    }
}
