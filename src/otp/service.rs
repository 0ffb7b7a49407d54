//! The request/verify orchestrator.
//!
//! Ties the code generator, hasher, store, rate limiter, email dispatch,
//! and token issuing into the two-phase login flow. Handlers stay thin;
//! every rule about code lifecycle lives here or in the store contract.

use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use super::code::{generate_code, hash_code, verify_code};
use super::models::{CodeIssued, OtpError, VerifiedSession};
use super::rate_limit::{RateLimitDecision, RateLimiter};
use super::store::OtpStore;
use super::token::{SessionClaims, TokenService};
use crate::api::email::EmailSender;

const DEFAULT_CODE_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_MAX_VERIFY_ATTEMPTS: i32 = 5;

/// Normalize an email for lookup/uniqueness checks.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Codes are exactly six ASCII digits.
#[must_use]
pub fn valid_code(code: &str) -> bool {
    code.len() == super::code::CODE_LENGTH && code.chars().all(|c| c.is_ascii_digit())
}

/// Tunables for the code lifecycle.
#[derive(Clone, Copy, Debug)]
pub struct OtpConfig {
    code_ttl: Duration,
    max_verify_attempts: i32,
    echo_codes: bool,
}

impl OtpConfig {
    /// Defaults: 10 minute code TTL, 5 guesses per issuance, no code echo.
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            max_verify_attempts: DEFAULT_MAX_VERIFY_ATTEMPTS,
            echo_codes: false,
        }
    }

    #[must_use]
    pub const fn with_code_ttl(mut self, ttl: Duration) -> Self {
        self.code_ttl = ttl;
        self
    }

    #[must_use]
    pub const fn with_max_verify_attempts(mut self, max_attempts: i32) -> Self {
        self.max_verify_attempts = max_attempts;
        self
    }

    /// Echo the plaintext code in request responses. Development only; the
    /// default stays off and production deployments must not enable it.
    #[must_use]
    pub const fn with_echo_codes(mut self, echo_codes: bool) -> Self {
        self.echo_codes = echo_codes;
        self
    }

    #[must_use]
    pub const fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    fn ttl_minutes(&self) -> i64 {
        i64::try_from(self.code_ttl.as_secs() / 60).unwrap_or(i64::MAX)
    }
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// The two-phase login orchestrator.
pub struct OtpService {
    store: Arc<dyn OtpStore>,
    limiter: Arc<dyn RateLimiter>,
    sender: Arc<dyn EmailSender>,
    tokens: TokenService,
    config: OtpConfig,
}

impl OtpService {
    #[must_use]
    pub fn new(
        store: Arc<dyn OtpStore>,
        limiter: Arc<dyn RateLimiter>,
        sender: Arc<dyn EmailSender>,
        tokens: TokenService,
        config: OtpConfig,
    ) -> Self {
        Self {
            store,
            limiter,
            sender,
            tokens,
            config,
        }
    }

    /// Issue a code for `email` and dispatch it.
    ///
    /// Issuing while a code is already outstanding silently replaces it;
    /// only the newest code verifies. If dispatch fails the stored record
    /// is rolled back so no undeliverable code stays outstanding.
    ///
    /// # Errors
    /// Returns the typed flow error; see `OtpError`.
    pub async fn request_code(
        &self,
        email: &str,
        client_ip: Option<&str>,
    ) -> Result<CodeIssued, OtpError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(OtpError::InvalidEmail);
        }

        // Limits are enforced before any code work to avoid amplification.
        if let RateLimitDecision::Limited { retry_after } = self.limiter.check_ip(client_ip).await {
            return Err(OtpError::RateLimited { retry_after });
        }
        if let RateLimitDecision::Limited { retry_after } = self.limiter.check_email(&email).await {
            return Err(OtpError::RateLimited { retry_after });
        }

        let code = generate_code();
        let digest = {
            let code = code.clone();
            tokio::task::spawn_blocking(move || hash_code(&code))
                .await
                .map_err(|err| OtpError::Hashing(err.into()))?
                .map_err(OtpError::Hashing)?
        };

        self.store
            .put(&email, &digest, self.config.code_ttl)
            .await
            .map_err(OtpError::Storage)?;

        if let Err(err) = self
            .sender
            .send_code(&email, &code, self.config.ttl_minutes())
            .await
        {
            // Roll back so the identity is not left with a code that was
            // never delivered.
            if let Err(remove_err) = self.store.remove(&email).await {
                error!("Failed to roll back undelivered code: {remove_err}");
            }
            return Err(OtpError::Delivery(err));
        }

        info!(email = %email, "login code issued");

        Ok(CodeIssued {
            echoed_code: self.config.echo_codes.then_some(code),
            email,
        })
    }

    /// Verify a submitted code and mint a session token.
    ///
    /// A wrong guess leaves the code outstanding so the user can retry
    /// within the TTL, but guesses are capped per issuance; reaching the
    /// cap invalidates the record.
    ///
    /// # Errors
    /// Returns the typed flow error; see `OtpError`.
    pub async fn verify_code(&self, email: &str, code: &str) -> Result<VerifiedSession, OtpError> {
        let email = normalize_email(email);
        if !valid_email(&email) {
            return Err(OtpError::InvalidEmail);
        }
        let code = code.trim().to_string();
        if !valid_code(&code) {
            return Err(OtpError::InvalidCode);
        }

        let record = self
            .store
            .lookup_live(&email)
            .await
            .map_err(OtpError::Storage)?
            .ok_or(OtpError::UnknownCode)?;

        let matches = tokio::task::spawn_blocking(move || verify_code(&code, &record.code_hash))
            .await
            .map_err(|err| OtpError::Hashing(err.into()))?;

        if !matches {
            self.store
                .record_mismatch(&email, self.config.max_verify_attempts)
                .await
                .map_err(OtpError::Storage)?;
            warn!(email = %email, "login code mismatch");
            return Err(OtpError::CodeMismatch);
        }

        // A concurrent verify may have consumed the record between lookup
        // and here; only the call that actually consumed it proceeds.
        if !self.store.consume(&email).await.map_err(OtpError::Storage)? {
            return Err(OtpError::UnknownCode);
        }

        let (token, expires_at) = self.tokens.mint(&email).map_err(OtpError::Signing)?;

        info!(email = %email, "login code verified");

        Ok(VerifiedSession {
            email,
            token,
            expires_at,
        })
    }

    /// Validate a bearer token presented to a protected endpoint.
    ///
    /// # Errors
    /// Fails closed on any signature or expiry problem.
    pub fn verify_session(&self, token: &str) -> Result<SessionClaims, OtpError> {
        self.tokens.verify(token).map_err(OtpError::Signing)
    }

    /// Backend name for `/health`.
    #[must_use]
    pub fn storage_kind(&self) -> &'static str {
        self.store.kind()
    }

    /// Backend reachability for `/health`.
    ///
    /// # Errors
    /// Returns the backend error when the store is unreachable.
    pub async fn storage_ping(&self) -> anyhow::Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otp::rate_limit::{MemoryRateLimiter, NoopRateLimiter};
    use crate::otp::store::MemoryOtpStore;
    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::sync::Mutex;

    const SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

    /// Captures outbound codes instead of delivering them.
    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl RecordingSender {
        fn last_code(&self) -> Option<String> {
            self.sent
                .lock()
                .ok()
                .and_then(|sent| sent.last().map(|(_, code)| code.clone()))
        }
    }

    #[async_trait]
    impl EmailSender for RecordingSender {
        async fn send_code(&self, to: &str, code: &str, _expires_minutes: i64) -> Result<()> {
            if let Ok(mut sent) = self.sent.lock() {
                sent.push((to.to_string(), code.to_string()));
            }
            Ok(())
        }
    }

    struct FailingSender;

    #[async_trait]
    impl EmailSender for FailingSender {
        async fn send_code(&self, _to: &str, _code: &str, _expires_minutes: i64) -> Result<()> {
            Err(anyhow!("smtp connection refused"))
        }
    }

    struct Harness {
        service: OtpService,
        sender: Arc<RecordingSender>,
    }

    fn harness(config: OtpConfig) -> Harness {
        let sender = Arc::new(RecordingSender::default());
        let service = OtpService::new(
            Arc::new(MemoryOtpStore::new()),
            Arc::new(NoopRateLimiter),
            sender.clone(),
            TokenService::new(&SecretString::from("test-secret"), SESSION_TTL_SECONDS),
            config,
        );
        Harness { service, sender }
    }

    #[tokio::test]
    async fn request_then_verify_succeeds() -> Result<()> {
        let h = harness(OtpConfig::new());
        h.service.request_code("Alice@Example.COM ", None).await?;

        let code = h.sender.last_code().expect("code dispatched");
        let session = h.service.verify_code("alice@example.com", &code).await?;

        assert_eq!(session.email, "alice@example.com");
        let claims = h.service.verify_session(&session.token)?;
        assert_eq!(claims.sub, "alice@example.com");
        Ok(())
    }

    #[tokio::test]
    async fn wrong_guess_does_not_consume() -> Result<()> {
        let h = harness(OtpConfig::new());
        h.service.request_code("alice@example.com", None).await?;
        let code = h.sender.last_code().expect("code dispatched");

        let wrong = if code == "000000" { "000001" } else { "000000" };
        let result = h.service.verify_code("alice@example.com", wrong).await;
        assert!(matches!(result, Err(OtpError::CodeMismatch)));

        // The correct code still verifies after a failed guess.
        assert!(h.service.verify_code("alice@example.com", &code).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn consumption_is_single_use() -> Result<()> {
        let h = harness(OtpConfig::new());
        h.service.request_code("alice@example.com", None).await?;
        let code = h.sender.last_code().expect("code dispatched");

        h.service.verify_code("alice@example.com", &code).await?;
        let second = h.service.verify_code("alice@example.com", &code).await;
        assert!(matches!(second, Err(OtpError::UnknownCode)));
        Ok(())
    }

    #[tokio::test]
    async fn reissue_invalidates_previous_code() -> Result<()> {
        let h = harness(OtpConfig::new());
        h.service.request_code("x@y.com", None).await?;
        let first = h.sender.last_code().expect("first code");

        h.service.request_code("x@y.com", None).await?;
        let second = h.sender.last_code().expect("second code");

        if first != second {
            let result = h.service.verify_code("x@y.com", &first).await;
            assert!(matches!(result, Err(OtpError::CodeMismatch)));
        }
        assert!(h.service.verify_code("x@y.com", &second).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn expired_code_fails() -> Result<()> {
        let h = harness(OtpConfig::new().with_code_ttl(Duration::ZERO));
        h.service.request_code("alice@example.com", None).await?;
        let code = h.sender.last_code().expect("code dispatched");

        let result = h.service.verify_code("alice@example.com", &code).await;
        assert!(matches!(result, Err(OtpError::UnknownCode)));
        Ok(())
    }

    #[tokio::test]
    async fn guess_cap_invalidates_record() -> Result<()> {
        let h = harness(OtpConfig::new().with_max_verify_attempts(2));
        h.service.request_code("alice@example.com", None).await?;
        let code = h.sender.last_code().expect("code dispatched");
        let wrong = if code == "000000" { "000001" } else { "000000" };

        for _ in 0..2 {
            let result = h.service.verify_code("alice@example.com", wrong).await;
            assert!(matches!(result, Err(OtpError::CodeMismatch)));
        }

        // The cap is reached; even the correct code no longer verifies.
        let result = h.service.verify_code("alice@example.com", &code).await;
        assert!(matches!(result, Err(OtpError::UnknownCode)));
        Ok(())
    }

    #[tokio::test]
    async fn delivery_failure_rolls_back_stored_code() -> Result<()> {
        let store = Arc::new(MemoryOtpStore::new());
        let service = OtpService::new(
            store.clone(),
            Arc::new(NoopRateLimiter),
            Arc::new(FailingSender),
            TokenService::new(&SecretString::from("test-secret"), SESSION_TTL_SECONDS),
            OtpConfig::new(),
        );

        let result = service.request_code("alice@example.com", None).await;
        assert!(matches!(result, Err(OtpError::Delivery(_))));

        use crate::otp::store::OtpStore;
        assert!(store.lookup_live("alice@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn rate_limit_denies_sixth_request() -> Result<()> {
        let sender = Arc::new(RecordingSender::default());
        let service = OtpService::new(
            Arc::new(MemoryOtpStore::new()),
            Arc::new(MemoryRateLimiter::new(Duration::from_secs(900), 5)),
            sender,
            TokenService::new(&SecretString::from("test-secret"), SESSION_TTL_SECONDS),
            OtpConfig::new(),
        );

        for _ in 0..5 {
            service.request_code("alice@example.com", None).await?;
        }
        let result = service.request_code("alice@example.com", None).await;
        assert!(matches!(result, Err(OtpError::RateLimited { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn echoed_code_is_gated() -> Result<()> {
        let h = harness(OtpConfig::new());
        let issued = h.service.request_code("alice@example.com", None).await?;
        assert!(issued.echoed_code.is_none());

        let h = harness(OtpConfig::new().with_echo_codes(true));
        let issued = h.service.request_code("alice@example.com", None).await?;
        assert_eq!(issued.echoed_code, h.sender.last_code());
        Ok(())
    }

    #[tokio::test]
    async fn malformed_inputs_are_rejected() {
        let h = harness(OtpConfig::new());

        let result = h.service.request_code("not-an-email", None).await;
        assert!(matches!(result, Err(OtpError::InvalidEmail)));

        let result = h.service.verify_code("alice@example.com", "12345").await;
        assert!(matches!(result, Err(OtpError::InvalidCode)));

        let result = h.service.verify_code("alice@example.com", "12345a").await;
        assert!(matches!(result, Err(OtpError::InvalidCode)));

        let result = h.service.verify_code("not-an-email", "123456").await;
        assert!(matches!(result, Err(OtpError::InvalidEmail)));
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Alice@Example.COM "), "alice@example.com");
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(valid_email("a@example.com"));
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn valid_code_requires_six_digits() {
        assert!(valid_code("000000"));
        assert!(valid_code("987654"));
        assert!(!valid_code("98765"));
        assert!(!valid_code("9876543"));
        assert!(!valid_code("98765a"));
    }
}
