use axum::{
    extract::Extension,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use utoipa::ToSchema;

use crate::gateman::handlers::{
    client_ip, login_error_response, pad_response_time, session_response, SessionPayload,
};
use crate::identity::{AdminLogin, IdentityVerifier};

#[derive(Deserialize, ToSchema)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/auth/login/admin",
    request_body = AdminLoginRequest,
    responses(
        (status = 200, description = "Session issued", body = SessionPayload),
        (status = 401, description = "Credentials rejected"),
        (status = 429, description = "Rate limited"),
    ),
    tag = "auth",
)]
/// Admin login with configured credentials.
pub async fn admin_login(
    verifier: Extension<Arc<IdentityVerifier>>,
    headers: HeaderMap,
    Json(body): Json<AdminLoginRequest>,
) -> impl IntoResponse {
    let started = Instant::now();
    let ip = client_ip(&headers);

    let input = AdminLogin {
        username: body.username,
        password: body.password,
    };

    let result = verifier.login_admin(input, ip.as_deref()).await;
    pad_response_time(started).await;

    match result {
        Ok(session) => session_response(session),
        Err(err) => login_error_response(err),
    }
}
