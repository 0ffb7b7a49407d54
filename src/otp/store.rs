//! Storage backends for outstanding login codes.
//!
//! Two implementations share one contract. `PgOtpStore` keeps one row per
//! identity in Postgres, survives restarts, and is safe across multiple
//! service instances. `MemoryOtpStore` keeps a process-local map; it is a
//! degraded single-instance mode, selected only when no database is
//! configured, and the server says so loudly at startup.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Connection, PgPool, Row};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info_span};

use super::models::OtpRecord;
use super::rate_limit::RateLimiter;

/// Cadence of the background sweep of expired and consumed records.
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Contract shared by the durable and in-memory backends.
///
/// All operations are atomic per identity: concurrent `put`/`consume` calls
/// for the same identity never leave two codes simultaneously valid, and
/// only one of two racing `consume` calls returns `true`.
#[async_trait]
pub trait OtpStore: Send + Sync {
    /// Upsert the live code for `identity`, replacing any previous one and
    /// resetting the failed-guess counter.
    async fn put(&self, identity: &str, code_hash: &str, ttl: Duration) -> Result<()>;

    /// Fetch the live (unconsumed, unexpired) record, if any. Expired
    /// records read as `None` even before the sweep removes them.
    async fn lookup_live(&self, identity: &str) -> Result<Option<OtpRecord>>;

    /// Atomically consume the live record. Returns `true` only for the
    /// caller that actually consumed it.
    async fn consume(&self, identity: &str) -> Result<bool>;

    /// Count a failed guess; the record is invalidated once `max_attempts`
    /// guesses have failed.
    async fn record_mismatch(&self, identity: &str, max_attempts: i32) -> Result<()>;

    /// Drop the live record outright (delivery-failure rollback).
    async fn remove(&self, identity: &str) -> Result<()>;

    /// Sweep expired and consumed records; returns how many were purged.
    async fn purge_expired(&self) -> Result<u64>;

    /// Backend reachability, reported by `/health`.
    async fn ping(&self) -> Result<()>;

    /// Backend name for logs and `/health`.
    fn kind(&self) -> &'static str;
}

/// Durable backend: one row per identity in `otp_codes`.
#[derive(Clone)]
pub struct PgOtpStore {
    pool: PgPool,
}

impl PgOtpStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OtpStore for PgOtpStore {
    async fn put(&self, identity: &str, code_hash: &str, ttl: Duration) -> Result<()> {
        // Single-statement upsert so concurrent puts for the same identity
        // are last-writer-wins with no read-modify-write window.
        let query = r"
            INSERT INTO otp_codes (email, code_hash, expires_at)
            VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
            ON CONFLICT (email) DO UPDATE
            SET code_hash = EXCLUDED.code_hash,
                attempts = 0,
                created_at = NOW(),
                expires_at = EXCLUDED.expires_at,
                consumed_at = NULL
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        sqlx::query(query)
            .bind(identity)
            .bind(code_hash)
            .bind(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX))
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to store login code")?;
        Ok(())
    }

    async fn lookup_live(&self, identity: &str) -> Result<Option<OtpRecord>> {
        let query = r"
            SELECT email, code_hash, attempts, created_at, expires_at
            FROM otp_codes
            WHERE email = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to look up login code")?;

        Ok(row.map(|row| OtpRecord {
            identity: row.get("email"),
            code_hash: row.get("code_hash"),
            attempts: row.get("attempts"),
            issued_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        }))
    }

    async fn consume(&self, identity: &str) -> Result<bool> {
        // The WHERE clause makes consumption single-use: of two racing
        // verifies, only one call matches the unconsumed row.
        let query = r"
            UPDATE otp_codes
            SET consumed_at = NOW()
            WHERE email = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING email
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to consume login code")?;
        Ok(row.is_some())
    }

    async fn record_mismatch(&self, identity: &str, max_attempts: i32) -> Result<()> {
        let query = r"
            UPDATE otp_codes
            SET attempts = attempts + 1
            WHERE email = $1
              AND consumed_at IS NULL
              AND expires_at > NOW()
            RETURNING attempts
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "UPDATE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(identity)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to record failed guess")?;

        let Some(row) = row else {
            return Ok(());
        };

        let attempts: i32 = row.get("attempts");
        if attempts >= max_attempts {
            self.remove(identity).await?;
        }
        Ok(())
    }

    async fn remove(&self, identity: &str) -> Result<()> {
        let query = "DELETE FROM otp_codes WHERE email = $1";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        sqlx::query(query)
            .bind(identity)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to remove login code")?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let query = r"
            DELETE FROM otp_codes
            WHERE expires_at <= NOW()
               OR consumed_at IS NOT NULL
        ";
        let span = info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let result = sqlx::query(query)
            .execute(&self.pool)
            .instrument(span)
            .await
            .context("failed to purge expired login codes")?;
        Ok(result.rows_affected())
    }

    async fn ping(&self) -> Result<()> {
        let span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("failed to acquire database connection")?;
        conn.ping()
            .instrument(span)
            .await
            .context("failed to ping database")
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

#[derive(Debug, Clone)]
struct MemoryEntry {
    code_hash: String,
    attempts: i32,
    issued_at: chrono::DateTime<Utc>,
    expires_at: chrono::DateTime<Utc>,
}

/// In-process fallback: not durable, not shared across instances.
#[derive(Default)]
pub struct MemoryOtpStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryOtpStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OtpStore for MemoryOtpStore {
    async fn put(&self, identity: &str, code_hash: &str, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).context("ttl out of range")?;
        let mut entries = self.entries.lock().await;
        entries.insert(
            identity.to_string(),
            MemoryEntry {
                code_hash: code_hash.to_string(),
                attempts: 0,
                issued_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn lookup_live(&self, identity: &str) -> Result<Option<OtpRecord>> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get(identity) else {
            return Ok(None);
        };
        if entry.expires_at <= Utc::now() {
            entries.remove(identity);
            return Ok(None);
        }
        Ok(Some(OtpRecord {
            identity: identity.to_string(),
            code_hash: entry.code_hash.clone(),
            attempts: entry.attempts,
            issued_at: entry.issued_at,
            expires_at: entry.expires_at,
        }))
    }

    async fn consume(&self, identity: &str) -> Result<bool> {
        let mut entries = self.entries.lock().await;
        match entries.remove(identity) {
            Some(entry) if entry.expires_at > Utc::now() => Ok(true),
            _ => Ok(false),
        }
    }

    async fn record_mismatch(&self, identity: &str, max_attempts: i32) -> Result<()> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(identity) {
            entry.attempts += 1;
            if entry.attempts >= max_attempts {
                entries.remove(identity);
            }
        }
        Ok(())
    }

    async fn remove(&self, identity: &str) -> Result<()> {
        self.entries.lock().await.remove(identity);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok((before - entries.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}

/// Spawn the background sweep over expired codes and stale limiter state.
pub fn spawn_purge_worker(
    store: Arc<dyn OtpStore>,
    limiter: Arc<dyn RateLimiter>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "purged expired login codes"),
                Err(err) => error!("login code purge failed: {err}"),
            }
            if let Err(err) = limiter.prune().await {
                error!("rate limit prune failed: {err}");
            }
            sleep(PURGE_INTERVAL).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test]
    async fn put_then_lookup_and_consume() -> Result<()> {
        let store = MemoryOtpStore::new();
        store.put("alice@example.com", "digest", TTL).await?;

        let record = store.lookup_live("alice@example.com").await?;
        assert_eq!(record.map(|r| r.code_hash), Some("digest".to_string()));

        assert!(store.consume("alice@example.com").await?);
        assert!(store.lookup_live("alice@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn consume_is_single_use() -> Result<()> {
        let store = MemoryOtpStore::new();
        store.put("alice@example.com", "digest", TTL).await?;

        assert!(store.consume("alice@example.com").await?);
        assert!(!store.consume("alice@example.com").await?);
        Ok(())
    }

    #[tokio::test]
    async fn expired_records_read_as_absent() -> Result<()> {
        let store = MemoryOtpStore::new();
        store
            .put("alice@example.com", "digest", Duration::ZERO)
            .await?;

        assert!(store.lookup_live("alice@example.com").await?.is_none());
        assert!(!store.consume("alice@example.com").await?);
        Ok(())
    }

    #[tokio::test]
    async fn new_code_replaces_previous_one() -> Result<()> {
        let store = MemoryOtpStore::new();
        store.put("alice@example.com", "first", TTL).await?;
        store.put("alice@example.com", "second", TTL).await?;

        let record = store.lookup_live("alice@example.com").await?;
        assert_eq!(record.map(|r| r.code_hash), Some("second".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn reissue_resets_attempt_counter() -> Result<()> {
        let store = MemoryOtpStore::new();
        store.put("alice@example.com", "first", TTL).await?;
        store.record_mismatch("alice@example.com", 5).await?;
        store.put("alice@example.com", "second", TTL).await?;

        let record = store.lookup_live("alice@example.com").await?;
        assert_eq!(record.map(|r| r.attempts), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn too_many_mismatches_invalidate_record() -> Result<()> {
        let store = MemoryOtpStore::new();
        store.put("alice@example.com", "digest", TTL).await?;

        for _ in 0..4 {
            store.record_mismatch("alice@example.com", 5).await?;
            assert!(store.lookup_live("alice@example.com").await?.is_some());
        }
        store.record_mismatch("alice@example.com", 5).await?;
        assert!(store.lookup_live("alice@example.com").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn purge_counts_expired_entries() -> Result<()> {
        let store = MemoryOtpStore::new();
        store.put("a@example.com", "digest", Duration::ZERO).await?;
        store.put("b@example.com", "digest", TTL).await?;

        assert_eq!(store.purge_expired().await?, 1);
        assert!(store.lookup_live("b@example.com").await?.is_some());
        Ok(())
    }
}
