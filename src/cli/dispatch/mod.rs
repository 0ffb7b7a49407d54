//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the server action and its configuration.

use crate::api::email::SmtpSettings;
use crate::cli::actions::{Action, server::Args};
use anyhow::{Context, Result};
use secrecy::SecretString;
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);

    let dsn = matches.get_one::<String>("dsn").cloned();
    if let Some(dsn) = &dsn {
        Url::parse(dsn).context("invalid database connection string")?;
    }

    // The signing secret has no default on purpose; refusing to start beats
    // shipping a well-known fallback secret.
    let jwt_secret = matches
        .get_one::<String>("jwt-secret")
        .cloned()
        .map(SecretString::from)
        .context("missing required argument: --jwt-secret")?;

    let smtp = matches
        .get_one::<String>("smtp-host")
        .cloned()
        .map(|host| SmtpSettings {
            host,
            port: matches.get_one::<u16>("smtp-port").copied().unwrap_or(587),
            username: matches.get_one::<String>("smtp-user").cloned(),
            password: matches
                .get_one::<String>("smtp-pass")
                .cloned()
                .map(SecretString::from),
            mail_from: matches
                .get_one::<String>("mail-from")
                .cloned()
                .unwrap_or_else(|| "Sesamo <no-reply@sesamo.dev>".to_string()),
        });

    Ok(Action::Server(Args {
        port,
        dsn,
        jwt_secret,
        session_ttl_seconds: matches
            .get_one::<i64>("session-ttl-seconds")
            .copied()
            .unwrap_or(604_800),
        otp_ttl_seconds: matches
            .get_one::<u64>("otp-ttl-seconds")
            .copied()
            .unwrap_or(600),
        rate_limit_window_seconds: matches
            .get_one::<u64>("rate-limit-window-seconds")
            .copied()
            .unwrap_or(900),
        rate_limit_max_requests: matches
            .get_one::<i64>("rate-limit-max-requests")
            .copied()
            .unwrap_or(5),
        max_verify_attempts: matches
            .get_one::<i32>("max-verify-attempts")
            .copied()
            .unwrap_or(5),
        echo_codes: matches.get_flag("echo-codes"),
        smtp,
    }))
}
