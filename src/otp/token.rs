//! Signed session tokens for verified identities.
//!
//! Tokens are self-contained HS256 assertions; nothing is persisted
//! server-side. The signing secret is supplied at process start and has no
//! default: a hardcoded fallback secret is a deployment misconfiguration
//! this service refuses to paper over.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Verified identity (normalized email).
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Mints and verifies session tokens with a symmetric secret.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl_seconds: i64,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &SecretString, ttl_seconds: i64) -> Self {
        let secret = secret.expose_secret().as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl_seconds,
        }
    }

    /// Mint a token asserting `identity`, expiring after the configured TTL.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn mint(&self, identity: &str) -> Result<(String, DateTime<Utc>)> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(self.ttl_seconds);
        let claims = SessionClaims {
            sub: identity.to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)
            .context("failed to sign session token")?;
        Ok((token, expires_at))
    }

    /// Verify a token; an ill-signed or expired token fails closed.
    ///
    /// # Errors
    /// Returns an error if the signature or expiry check fails.
    pub fn verify(&self, token: &str) -> Result<SessionClaims> {
        decode::<SessionClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .context("session token rejected")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const WEEK_SECONDS: i64 = 7 * 24 * 60 * 60;

    fn service(ttl_seconds: i64) -> TokenService {
        TokenService::new(&SecretString::from("test-signing-secret"), ttl_seconds)
    }

    #[test]
    fn mint_and_verify_round_trip() -> Result<()> {
        let tokens = service(WEEK_SECONDS);
        let (token, expires_at) = tokens.mint("alice@example.com")?;

        let claims = tokens.verify(&token)?;
        assert_eq!(claims.sub, "alice@example.com");
        assert_eq!(claims.exp, expires_at.timestamp());
        Ok(())
    }

    #[test]
    fn expiry_is_seven_days_out() -> Result<()> {
        let tokens = service(WEEK_SECONDS);
        let (token, _) = tokens.mint("alice@example.com")?;
        let claims = tokens.verify(&token)?;

        let lifetime = claims.exp - claims.iat;
        assert_eq!(lifetime, WEEK_SECONDS);
        Ok(())
    }

    #[test]
    fn wrong_secret_fails_closed() -> Result<()> {
        let minter = service(WEEK_SECONDS);
        let other = TokenService::new(&SecretString::from("different-secret"), WEEK_SECONDS);

        let (token, _) = minter.mint("alice@example.com")?;
        assert!(other.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn expired_token_fails_closed() -> Result<()> {
        // Expiry far enough in the past to clear the default leeway.
        let tokens = service(-120);
        let (token, _) = tokens.mint("alice@example.com")?;
        assert!(tokens.verify(&token).is_err());
        Ok(())
    }

    #[test]
    fn garbage_token_fails_closed() {
        let tokens = service(WEEK_SECONDS);
        assert!(tokens.verify("not-a-token").is_err());
        assert!(tokens.verify("").is_err());
    }
}
