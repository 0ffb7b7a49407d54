//! Code issuance endpoint.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::error;

use super::state::AuthState;
use super::types::{RequestCodeRequest, RequestCodeResponse};
use super::utils::extract_client_ip;
use crate::otp::OtpError;

/// Issue a login code for an email address and dispatch it.
#[utoipa::path(
    post,
    path = "/auth/request-code",
    request_body = RequestCodeRequest,
    responses(
        (status = 200, description = "Code sent", body = RequestCodeResponse),
        (status = 400, description = "Invalid email", body = String),
        (status = 429, description = "Rate limited", body = String),
        (status = 500, description = "Delivery or storage failure", body = String)
    ),
    tag = "auth"
)]
pub async fn request_code(
    headers: HeaderMap,
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RequestCodeRequest>>,
) -> impl IntoResponse {
    let request: RequestCodeRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let client_ip = extract_client_ip(&headers);
    match state
        .service()
        .request_code(&request.email, client_ip.as_deref())
        .await
    {
        Ok(issued) => (
            StatusCode::OK,
            Json(RequestCodeResponse {
                message: "Code sent. Check your email.".to_string(),
                email: issued.email,
                code: issued.echoed_code,
            }),
        )
            .into_response(),
        Err(OtpError::InvalidEmail) => {
            (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response()
        }
        Err(OtpError::RateLimited { retry_after }) => {
            let mut response_headers = HeaderMap::new();
            if let Some(retry_after) = retry_after {
                if let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string()) {
                    response_headers.insert("retry-after", value);
                }
            }
            (
                StatusCode::TOO_MANY_REQUESTS,
                response_headers,
                "Too many code requests. Please try again later.".to_string(),
            )
                .into_response()
        }
        Err(OtpError::Delivery(err)) => {
            error!("Failed to send login code: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to send email".to_string(),
            )
                .into_response()
        }
        Err(err) => {
            error!("Failed to issue login code: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Request failed".to_string(),
            )
                .into_response()
        }
    }
}
