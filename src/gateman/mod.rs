#[allow(unused_imports)]
use crate::{
    cli::globals::GlobalArgs,
    fas::{FasGateway, FasSource, FasTarget},
    gateman::handlers::{
        admin, admin::__path_admin_login, health, health::__path_health, login,
        login::__path_login, session, session::__path_logout, session::__path_refresh,
    },
    identity::{AuthConfig, IdentityVerifier},
    kv::MemoryKv,
};
use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    http::{HeaderName, HeaderValue, Method},
    routing::{get, post},
};
use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

pub mod handlers;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// How often idle FAS connections are swept.
const FAS_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(OpenApi)]
#[openapi(
    paths(health, login, admin_login, refresh, logout),
    components(schemas(
        health::Health,
        login::LoginRequest,
        admin::AdminLoginRequest,
        session::RefreshRequest,
        session::LogoutRequest,
        handlers::SessionPayload,
        handlers::SessionUser,
    )),
    tags(
        (name = "auth", description = "Identity and attendance verification API"),
    )
)]
struct ApiDoc;

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

/// Builds the verifier and serves the API.
///
/// # Errors
/// Returns an error when configuration is invalid, the database is
/// unreachable, or the listener cannot bind.
pub async fn new(port: u16, dsn: String, globals: &GlobalArgs) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let keys = Arc::new(crate::crypto::KeyRing::new(
        globals.encryption_key.expose_secret(),
        globals.hmac_secret.expose_secret(),
        globals.jwt_secret.clone(),
    )?);

    let fas = fas_gateway(globals)?;
    if let Some(fas) = &fas {
        let fas = Arc::clone(fas);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(FAS_SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                fas.sweep().await;
            }
        });
    }

    let verifier = Arc::new(IdentityVerifier::new(
        pool.clone(),
        MemoryKv::shared(),
        fas,
        keys,
        AuthConfig {
            require_attendance: globals.require_attendance,
            admin_username: globals.admin_username.clone(),
            admin_password_hash: globals.admin_password_hash.clone(),
        },
    ));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/auth/login", post(handlers::login))
        .route("/auth/login/admin", post(handlers::admin_login))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", post(handlers::logout))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Uuid::new_v4().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(Extension(Arc::clone(&verifier))),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(pool))
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

fn fas_gateway(globals: &GlobalArgs) -> Result<Option<Arc<FasGateway>>> {
    let (Some(dsn), Some(site_cd)) = (globals.fas_dsn.as_ref(), globals.fas_site.clone()) else {
        info!("FAS is not configured, attendance runs on local records only");
        return Ok(None);
    };

    let target = FasTarget::from_dsn(dsn.expose_secret())?;
    let db_name = globals
        .fas_db
        .clone()
        .unwrap_or_else(|| target.database().to_string());

    Ok(Some(Arc::new(FasGateway::new(
        target,
        FasSource { db_name, site_cd },
    ))))
}
