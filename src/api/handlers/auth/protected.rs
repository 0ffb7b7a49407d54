//! Example bearer-protected endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use chrono::DateTime;
use std::sync::Arc;

use super::state::AuthState;
use super::types::ProtectedResponse;
use super::utils::extract_bearer_token;

/// Demonstrates stateless session validation for downstream consumers.
#[utoipa::path(
    get,
    path = "/protected",
    responses(
        (status = 200, description = "Session token is valid", body = ProtectedResponse),
        (status = 401, description = "Missing, ill-signed, or expired token", body = String)
    ),
    tag = "auth"
)]
pub async fn protected(headers: HeaderMap, state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let Some(token) = extract_bearer_token(&headers) else {
        return (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response();
    };

    match state.service().verify_session(&token) {
        Ok(claims) => {
            let expires = DateTime::from_timestamp(claims.exp, 0)
                .map_or_else(|| claims.exp.to_string(), |at| at.to_rfc3339());
            (
                StatusCode::OK,
                Json(ProtectedResponse {
                    ok: true,
                    user: claims.sub,
                    expires,
                }),
            )
                .into_response()
        }
        // Any verification failure is the same opaque 401.
        Err(_) => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()).into_response(),
    }
}
