//! Auth runtime state and configuration.

use secrecy::SecretString;
use std::time::Duration;

use crate::api::email::SmtpSettings;
use crate::otp::OtpService;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_OTP_TTL_SECONDS: u64 = 10 * 60;
const DEFAULT_RATE_LIMIT_WINDOW_SECONDS: u64 = 15 * 60;
const DEFAULT_RATE_LIMIT_MAX_REQUESTS: i64 = 5;
const DEFAULT_MAX_VERIFY_ATTEMPTS: i32 = 5;

/// Service configuration assembled by the CLI.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    session_ttl_seconds: i64,
    otp_ttl_seconds: u64,
    rate_limit_window_seconds: u64,
    rate_limit_max_requests: i64,
    max_verify_attempts: i32,
    echo_codes: bool,
    smtp: Option<SmtpSettings>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            otp_ttl_seconds: DEFAULT_OTP_TTL_SECONDS,
            rate_limit_window_seconds: DEFAULT_RATE_LIMIT_WINDOW_SECONDS,
            rate_limit_max_requests: DEFAULT_RATE_LIMIT_MAX_REQUESTS,
            max_verify_attempts: DEFAULT_MAX_VERIFY_ATTEMPTS,
            echo_codes: false,
            smtp: None,
        }
    }

    #[must_use]
    pub const fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_otp_ttl_seconds(mut self, seconds: u64) -> Self {
        self.otp_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_rate_limit_window_seconds(mut self, seconds: u64) -> Self {
        self.rate_limit_window_seconds = seconds;
        self
    }

    #[must_use]
    pub const fn with_rate_limit_max_requests(mut self, max_requests: i64) -> Self {
        self.rate_limit_max_requests = max_requests;
        self
    }

    #[must_use]
    pub const fn with_max_verify_attempts(mut self, max_attempts: i32) -> Self {
        self.max_verify_attempts = max_attempts;
        self
    }

    #[must_use]
    pub const fn with_echo_codes(mut self, echo_codes: bool) -> Self {
        self.echo_codes = echo_codes;
        self
    }

    #[must_use]
    pub fn with_smtp(mut self, smtp: Option<SmtpSettings>) -> Self {
        self.smtp = smtp;
        self
    }

    #[must_use]
    pub const fn jwt_secret(&self) -> &SecretString {
        &self.jwt_secret
    }

    #[must_use]
    pub const fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    #[must_use]
    pub const fn otp_ttl(&self) -> Duration {
        Duration::from_secs(self.otp_ttl_seconds)
    }

    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_seconds)
    }

    #[must_use]
    pub const fn rate_limit_max_requests(&self) -> i64 {
        self.rate_limit_max_requests
    }

    #[must_use]
    pub const fn max_verify_attempts(&self) -> i32 {
        self.max_verify_attempts
    }

    #[must_use]
    pub const fn echo_codes(&self) -> bool {
        self.echo_codes
    }

    #[must_use]
    pub const fn smtp(&self) -> Option<&SmtpSettings> {
        self.smtp.as_ref()
    }
}

/// Shared handler state: the orchestrator behind every auth endpoint.
pub struct AuthState {
    service: OtpService,
}

impl AuthState {
    #[must_use]
    pub fn new(service: OtpService) -> Self {
        Self { service }
    }

    #[must_use]
    pub fn service(&self) -> &OtpService {
        &self.service
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new(SecretString::from("secret"));

        assert_eq!(config.session_ttl_seconds(), 604_800);
        assert_eq!(config.otp_ttl(), Duration::from_secs(600));
        assert_eq!(config.rate_limit_window(), Duration::from_secs(900));
        assert_eq!(config.rate_limit_max_requests(), 5);
        assert_eq!(config.max_verify_attempts(), 5);
        assert!(!config.echo_codes());
        assert!(config.smtp().is_none());

        let config = config
            .with_session_ttl_seconds(3600)
            .with_otp_ttl_seconds(120)
            .with_rate_limit_window_seconds(60)
            .with_rate_limit_max_requests(2)
            .with_max_verify_attempts(3)
            .with_echo_codes(true);

        assert_eq!(config.session_ttl_seconds(), 3600);
        assert_eq!(config.otp_ttl(), Duration::from_secs(120));
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
        assert_eq!(config.rate_limit_max_requests(), 2);
        assert_eq!(config.max_verify_attempts(), 3);
        assert!(config.echo_codes());
    }

    #[test]
    fn debug_output_redacts_the_secret() {
        let config = AuthConfig::new(SecretString::from("super-secret-value"));
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-value"));
    }
}
