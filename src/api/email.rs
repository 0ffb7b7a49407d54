//! Email delivery abstractions for login codes.
//!
//! The default sender for local development is `LogEmailSender`, which logs
//! the code instead of sending real email. `SmtpEmailSender` delivers over
//! SMTP and is selected when the SMTP flags are configured.

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

/// Email delivery abstraction used by the request-code flow.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a login code or return an error to fail the request.
    async fn send_code(&self, to: &str, code: &str, expires_minutes: i64) -> Result<()>;
}

/// Local dev sender that logs the code instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send_code(&self, to: &str, code: &str, expires_minutes: i64) -> Result<()> {
        info!(
            to_email = %to,
            code = %code,
            expires_minutes,
            "login code email send stub"
        );
        Ok(())
    }
}

/// SMTP settings taken from the CLI.
#[derive(Clone, Debug)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub mail_from: String,
}

/// Production sender delivering codes over SMTP.
#[derive(Clone)]
pub struct SmtpEmailSender {
    mailer: SmtpTransport,
    mail_from: String,
}

impl SmtpEmailSender {
    /// Build a relay transport from the SMTP settings.
    ///
    /// # Errors
    /// Returns an error if the relay host or from address is invalid.
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let mut builder = SmtpTransport::relay(&settings.host)
            .with_context(|| format!("invalid SMTP relay host: {}", settings.host))?
            .port(settings.port);

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            mailer: builder.build(),
            mail_from: settings.mail_from.clone(),
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send_code(&self, to: &str, code: &str, expires_minutes: i64) -> Result<()> {
        let text = code_text_body(code, expires_minutes);
        let html = code_html_body(code, expires_minutes);

        let email = Message::builder()
            .from(
                self.mail_from
                    .parse()
                    .with_context(|| format!("invalid from address: {}", self.mail_from))?,
            )
            .to(to
                .parse()
                .with_context(|| format!("invalid to address: {to}"))?)
            .subject("Your login code")
            .multipart(MultiPart::alternative_plain_html(text, html))
            .context("failed to build login code email")?;

        // The blocking transport must not stall the request-handling runtime.
        let mailer = self.mailer.clone();
        tokio::task::spawn_blocking(move || {
            mailer.send(&email).context("failed to send login code email")
        })
        .await
        .context("email send task failed")??;

        Ok(())
    }
}

fn code_text_body(code: &str, expires_minutes: i64) -> String {
    format!("Your sign-in code is {code}. It expires in {expires_minutes} minutes.")
}

fn code_html_body(code: &str, expires_minutes: i64) -> String {
    format!(
        r#"<div style="font-family:system-ui,Segoe UI,Roboto,Arial">
  <p>Your sign-in code:</p>
  <div style="font-size:28px;font-weight:700;letter-spacing:6px">{code}</div>
  <p style="color:#555">Expires in {expires_minutes} minutes.</p>
  <p style="color:#555">If you didn't request this email, you can safely ignore it.</p>
</div>"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[tokio::test]
    async fn log_sender_always_succeeds() -> Result<()> {
        let sender = LogEmailSender;
        sender.send_code("user@example.com", "123456", 10).await
    }

    #[test]
    fn bodies_carry_code_and_expiry() {
        let text = code_text_body("042719", 10);
        assert!(text.contains("042719"));
        assert!(text.contains("10 minutes"));

        let html = code_html_body("042719", 10);
        assert!(html.contains("042719"));
        assert!(html.contains("Expires in 10 minutes"));
    }

    #[test]
    fn smtp_sender_builds_without_credentials() -> Result<()> {
        let settings = SmtpSettings {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            mail_from: "Sesamo <no-reply@sesamo.dev>".to_string(),
        };
        let _sender = SmtpEmailSender::new(&settings)?;
        Ok(())
    }
}
