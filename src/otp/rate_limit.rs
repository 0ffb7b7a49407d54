//! Issuance rate limiting for the request-code flow.
//!
//! A fixed window bounds how many codes a key may request; both the client
//! IP and the normalized email are checked. Backend failures fail closed:
//! an unreachable limiter denies issuance rather than skipping the check.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{Instrument, error, info_span};

/// Outcome of a limiter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited { retry_after: Option<Duration> },
}

impl RateLimitDecision {
    #[must_use]
    pub const fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }
}

#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Check and count one issuance attempt for a normalized email.
    async fn check_email(&self, email: &str) -> RateLimitDecision;

    /// Check and count one issuance attempt for a client IP, when one could
    /// be derived from the request.
    async fn check_ip(&self, ip: Option<&str>) -> RateLimitDecision;

    /// Drop state that no longer affects any window; returns entries removed.
    async fn prune(&self) -> Result<u64> {
        Ok(0)
    }
}

/// Limiter that never denies; used in tests.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

#[async_trait]
impl RateLimiter for NoopRateLimiter {
    async fn check_email(&self, _email: &str) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    async fn check_ip(&self, _ip: Option<&str>) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// Database-backed limiter: counts rows in `otp_request_log` per key within
/// the window, so limits hold across multiple service instances.
#[derive(Clone)]
pub struct PgRateLimiter {
    pool: PgPool,
    window: Duration,
    max_requests: i64,
}

impl PgRateLimiter {
    #[must_use]
    pub fn new(pool: PgPool, window: Duration, max_requests: i64) -> Self {
        Self {
            pool,
            window,
            max_requests,
        }
    }

    async fn check_key(&self, key: &str) -> RateLimitDecision {
        match self.count_and_register(key).await {
            Ok(decision) => decision,
            Err(err) => {
                error!("Failed to check rate limit: {err}");
                // Fail closed
                RateLimitDecision::Limited { retry_after: None }
            }
        }
    }

    async fn count_and_register(&self, key: &str) -> Result<RateLimitDecision> {
        let window_seconds = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);

        let query = r"
            SELECT COUNT(*) AS requests, MIN(created_at) AS oldest
            FROM otp_request_log
            WHERE limiter_key = $1
              AND created_at > NOW() - ($2 * INTERVAL '1 second')
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(key)
            .bind(window_seconds)
            .fetch_one(&self.pool)
            .instrument(span)
            .await
            .context("failed to count rate limit window")?;

        let requests: i64 = row.get("requests");
        if requests >= self.max_requests {
            let oldest: Option<DateTime<Utc>> = row.get("oldest");
            let retry_after = oldest.and_then(|oldest| {
                let reopens = oldest + chrono::Duration::seconds(window_seconds);
                (reopens - Utc::now()).to_std().ok()
            });
            return Ok(RateLimitDecision::Limited { retry_after });
        }

        let query = "INSERT INTO otp_request_log (limiter_key) VALUES ($1)";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(key)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to register rate limit attempt")?;

        Ok(RateLimitDecision::Allowed)
    }
}

#[async_trait]
impl RateLimiter for PgRateLimiter {
    async fn check_email(&self, email: &str) -> RateLimitDecision {
        self.check_key(&format!("email:{email}")).await
    }

    async fn check_ip(&self, ip: Option<&str>) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check_key(&format!("ip:{ip}")).await,
            None => RateLimitDecision::Allowed,
        }
    }

    async fn prune(&self) -> Result<u64> {
        let window_seconds = i64::try_from(self.window.as_secs()).unwrap_or(i64::MAX);
        let query = r"
            DELETE FROM otp_request_log
            WHERE created_at <= NOW() - ($1 * INTERVAL '1 second')
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .bind(window_seconds)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to prune rate limit log")?;
        Ok(result.rows_affected())
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: i64,
    window_start: DateTime<Utc>,
}

/// In-process fixed-window limiter for the degraded (no database) mode.
pub struct MemoryRateLimiter {
    windows: Mutex<HashMap<String, Window>>,
    window: Duration,
    max_requests: i64,
}

impl MemoryRateLimiter {
    #[must_use]
    pub fn new(window: Duration, max_requests: i64) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            window,
            max_requests,
        }
    }

    fn window_length(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or_else(|_| chrono::Duration::seconds(0))
    }

    async fn check_key(&self, key: &str) -> RateLimitDecision {
        let now = Utc::now();
        let length = self.window_length();
        let mut windows = self.windows.lock().await;
        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            window_start: now,
        });

        if now >= entry.window_start + length {
            entry.count = 0;
            entry.window_start = now;
        }

        if entry.count >= self.max_requests {
            let retry_after = (entry.window_start + length - now).to_std().ok();
            return RateLimitDecision::Limited { retry_after };
        }

        entry.count += 1;
        RateLimitDecision::Allowed
    }
}

#[async_trait]
impl RateLimiter for MemoryRateLimiter {
    async fn check_email(&self, email: &str) -> RateLimitDecision {
        self.check_key(&format!("email:{email}")).await
    }

    async fn check_ip(&self, ip: Option<&str>) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check_key(&format!("ip:{ip}")).await,
            None => RateLimitDecision::Allowed,
        }
    }

    async fn prune(&self) -> Result<u64> {
        let now = Utc::now();
        let length = self.window_length();
        let mut windows = self.windows.lock().await;
        let before = windows.len();
        windows.retain(|_, window| now < window.window_start + length);
        Ok((before - windows.len()) as u64)
    }
}
