//! Code verification endpoint.

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{VerifyCodeRequest, VerifyCodeResponse};
use crate::otp::OtpError;

/// Verify a submitted code and return a session token.
#[utoipa::path(
    post,
    path = "/auth/verify-code",
    request_body = VerifyCodeRequest,
    responses(
        (status = 200, description = "Code verified, session token issued", body = VerifyCodeResponse),
        (status = 400, description = "Missing or malformed fields", body = String),
        (status = 401, description = "Invalid or expired code", body = String),
        (status = 500, description = "Verification failure", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_code(
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyCodeRequest>>,
) -> impl IntoResponse {
    let request: VerifyCodeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    match state
        .service()
        .verify_code(&request.email, &request.code)
        .await
    {
        Ok(session) => (
            StatusCode::OK,
            Json(VerifyCodeResponse {
                token: session.token,
                email: session.email,
                expires_at: session.expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(OtpError::InvalidEmail | OtpError::InvalidCode) => (
            StatusCode::BAD_REQUEST,
            "Email and a 6-digit code are required".to_string(),
        )
            .into_response(),
        // Unknown and mismatched codes share one surface so callers cannot
        // probe which case occurred.
        Err(OtpError::UnknownCode | OtpError::CodeMismatch) => (
            StatusCode::UNAUTHORIZED,
            "Invalid or expired code".to_string(),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to verify login code: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Verification failed".to_string(),
            )
                .into_response()
        }
    }
}
