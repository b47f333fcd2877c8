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
    client_ip, device_id, login_error_response, pad_response_time, session_response,
    SessionPayload,
};
use crate::identity::{IdentityVerifier, WorkerLogin};

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    /// Birth date, `YYYYMMDD` or `YYMMDD`.
    #[serde(default)]
    pub dob: String,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = SessionPayload),
        (status = 400, description = "Missing fields"),
        (status = 401, description = "Identity not verified"),
        (status = 403, description = "Attendance not verified"),
        (status = 429, description = "Rate limited or account locked"),
    ),
    tag = "auth",
)]
/// Worker login with name, phone and birth date.
pub async fn login(
    verifier: Extension<Arc<IdentityVerifier>>,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> impl IntoResponse {
    let started = Instant::now();
    let ip = client_ip(&headers);

    let input = WorkerLogin {
        name: body.name,
        phone: body.phone,
        dob: body.dob,
        device_id: body.device_id.or_else(|| device_id(&headers)),
    };

    let result = verifier.login_worker(input, ip.as_deref()).await;
    pad_response_time(started).await;

    match result {
        Ok(session) => session_response(session),
        Err(err) => login_error_response(err),
    }
}
