use crate::api;
use crate::api::email::SmtpSettings;
use crate::api::handlers::auth::AuthConfig;
use anyhow::Result;
use secrecy::SecretString;
use tracing::debug;

/// Server arguments assembled by dispatch. Secrets are wrapped so the Debug
/// output stays safe to log.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: Option<String>,
    pub jwt_secret: SecretString,
    pub session_ttl_seconds: i64,
    pub otp_ttl_seconds: u64,
    pub rate_limit_window_seconds: u64,
    pub rate_limit_max_requests: i64,
    pub max_verify_attempts: i32,
    pub echo_codes: bool,
    pub smtp: Option<SmtpSettings>,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let config = AuthConfig::new(args.jwt_secret)
        .with_session_ttl_seconds(args.session_ttl_seconds)
        .with_otp_ttl_seconds(args.otp_ttl_seconds)
        .with_rate_limit_window_seconds(args.rate_limit_window_seconds)
        .with_rate_limit_max_requests(args.rate_limit_max_requests)
        .with_max_verify_attempts(args.max_verify_attempts)
        .with_echo_codes(args.echo_codes)
        .with_smtp(args.smtp);

    api::new(args.port, args.dsn, config).await
}
