//! Health endpoint reporting storage backend status.

use axum::{
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};
use utoipa::ToSchema;

use super::auth::AuthState;
use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    /// Backend name: `postgres` or `memory` (degraded mode).
    storage_backend: String,
    storage: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Storage backend is healthy", body = Health),
        (status = 503, description = "Storage backend is unhealthy", body = Health)
    ),
    tag = "health"
)]
pub async fn health(state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let storage_result = state.service().storage_ping().await;
    if let Err(ref err) = storage_result {
        error!("Storage health check failed: {err}");
    }

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        storage_backend: state.service().storage_kind().to_string(),
        storage: if storage_result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) =
        format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>()
    {
        headers.insert("X-App", value);
    }

    if storage_result.is_ok() {
        debug!("Storage backend is healthy");
        (StatusCode::OK, headers, Json(health)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, Json(health)).into_response()
    }
}
