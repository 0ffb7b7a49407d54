use anyhow::{Context, Result};
use axum::{
    Extension, Router,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span, warn};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;

use crate::api::email::{EmailSender, LogEmailSender, SmtpEmailSender};
use crate::api::handlers::auth::{AuthConfig, AuthState};
use crate::otp::rate_limit::{MemoryRateLimiter, PgRateLimiter, RateLimiter};
use crate::otp::store::{MemoryOtpStore, OtpStore, PgOtpStore, spawn_purge_worker};
use crate::otp::{OtpConfig, OtpService, TokenService};

pub mod email;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Assemble the axum application for a prepared auth state.
///
/// Shared with the integration tests, which drive the full middleware stack
/// without binding a socket.
#[must_use]
pub fn app(state: Arc<AuthState>) -> Router {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    let (router, _openapi) = router().split_for_parts();
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(state)),
    )
}

/// Start the server.
///
/// Without a DSN the service falls back to in-process storage, a degraded
/// single-instance mode that is announced loudly at startup.
///
/// # Errors
/// Returns an error if the database is unreachable, the SMTP settings are
/// invalid, or the listener cannot bind.
pub async fn new(port: u16, dsn: Option<String>, config: AuthConfig) -> Result<()> {
    let (store, limiter): (Arc<dyn OtpStore>, Arc<dyn RateLimiter>) = match dsn {
        Some(dsn) => {
            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                // Store and limiter calls fail closed, so keep waits short.
                .acquire_timeout(Duration::from_secs(3))
                .test_before_acquire(true)
                .connect(&dsn)
                .await
                .context("Failed to connect to database")?;
            (
                Arc::new(PgOtpStore::new(pool.clone())),
                Arc::new(PgRateLimiter::new(
                    pool,
                    config.rate_limit_window(),
                    config.rate_limit_max_requests(),
                )),
            )
        }
        None => {
            warn!(
                "No database configured; keeping login codes in process memory. \
                 This degraded mode is not durable and must not serve more than one instance"
            );
            (
                Arc::new(MemoryOtpStore::new()),
                Arc::new(MemoryRateLimiter::new(
                    config.rate_limit_window(),
                    config.rate_limit_max_requests(),
                )),
            )
        }
    };

    let sender: Arc<dyn EmailSender> = match config.smtp() {
        Some(settings) => Arc::new(SmtpEmailSender::new(settings)?),
        None => {
            warn!("SMTP not configured; login codes will be logged instead of emailed");
            Arc::new(LogEmailSender)
        }
    };

    if config.echo_codes() {
        warn!(
            "Code echoing is enabled; responses will carry plaintext login codes. \
             Never enable this in production"
        );
    }

    let tokens = TokenService::new(config.jwt_secret(), config.session_ttl_seconds());
    let otp_config = OtpConfig::new()
        .with_code_ttl(config.otp_ttl())
        .with_max_verify_attempts(config.max_verify_attempts())
        .with_echo_codes(config.echo_codes());
    let service = OtpService::new(
        store.clone(),
        limiter.clone(),
        sender,
        tokens,
        otp_config,
    );

    spawn_purge_worker(store, limiter);

    let state = Arc::new(AuthState::new(service));
    let app = app(state);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
