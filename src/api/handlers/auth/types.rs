//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RequestCodeRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RequestCodeResponse {
    pub message: String,
    pub email: String,
    /// Plaintext code, present only when code echoing is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyCodeRequest {
    pub email: String,
    pub code: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyCodeResponse {
    pub token: String,
    pub email: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProtectedResponse {
    pub ok: bool,
    pub user: String,
    pub expires: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn request_code_request_round_trips() -> Result<()> {
        let request = RequestCodeRequest {
            email: "alice@example.com".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let email = value
            .get("email")
            .and_then(serde_json::Value::as_str)
            .context("missing email")?;
        assert_eq!(email, "alice@example.com");
        let decoded: RequestCodeRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.email, "alice@example.com");
        Ok(())
    }

    #[test]
    fn code_field_is_omitted_unless_echoed() -> Result<()> {
        let response = RequestCodeResponse {
            message: "sent".to_string(),
            email: "alice@example.com".to_string(),
            code: None,
        };
        let value = serde_json::to_value(&response)?;
        assert!(value.get("code").is_none());

        let response = RequestCodeResponse {
            message: "sent".to_string(),
            email: "alice@example.com".to_string(),
            code: Some("123456".to_string()),
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(
            value.get("code").and_then(serde_json::Value::as_str),
            Some("123456")
        );
        Ok(())
    }

    #[test]
    fn verify_code_request_round_trips() -> Result<()> {
        let request = VerifyCodeRequest {
            email: "bob@example.com".to_string(),
            code: "042719".to_string(),
        };
        let value = serde_json::to_value(&request)?;
        let decoded: VerifyCodeRequest = serde_json::from_value(value)?;
        assert_eq!(decoded.email, "bob@example.com");
        assert_eq!(decoded.code, "042719");
        Ok(())
    }
}
