//! Data model and error kinds for the one-time-code flow.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One outstanding login attempt for an identity.
///
/// At most one live record exists per identity; issuing a new code replaces
/// any previous one. The plaintext code is never part of this model.
#[derive(Debug, Clone)]
pub struct OtpRecord {
    /// Normalized email used as the lookup key.
    pub identity: String,
    /// bcrypt digest of the plaintext code.
    pub code_hash: String,
    /// Failed guesses against this issuance.
    pub attempts: i32,
    pub issued_at: DateTime<Utc>,
    /// Absolute expiry, so records survive restarts of a durable backend.
    pub expires_at: DateTime<Utc>,
}

/// Acknowledgment for an issued code.
#[derive(Debug, Clone)]
pub struct CodeIssued {
    pub email: String,
    /// Plaintext code, populated only when code echoing is enabled
    /// (a development mode; production responses never carry the code).
    pub echoed_code: Option<String>,
}

/// A minted session for a verified identity.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub email: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Error kinds surfaced by the request/verify flow.
///
/// `UnknownCode` and `CodeMismatch` are distinct here for logging and tests,
/// but handlers give them one indistinguishable external surface.
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error("invalid email address")]
    InvalidEmail,

    #[error("invalid code format")]
    InvalidCode,

    #[error("too many code requests")]
    RateLimited { retry_after: Option<Duration> },

    /// No live code for the identity: never issued, expired, consumed, or
    /// invalidated after too many failed guesses.
    #[error("no live code for identity")]
    UnknownCode,

    /// A live code exists but the guess did not match its digest.
    #[error("code mismatch")]
    CodeMismatch,

    #[error("email delivery failed")]
    Delivery(#[source] anyhow::Error),

    #[error("code hashing failed")]
    Hashing(#[source] anyhow::Error),

    #[error("token signing or verification failed")]
    Signing(#[source] anyhow::Error),

    #[error("storage failure")]
    Storage(#[source] anyhow::Error),
}
