//! Ingress rate limiting
//!
//! Limits how many interactions one identity (usually a student id) may start
//! within a sliding window. Counts live in the shared `rate_limits` table so
//! the limit holds across every worker process using the same database.
//!
//! Entries older than the window are pruned on every recorded operation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::PipelineError;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Ingress guard consulted before an interaction is processed
#[async_trait]
pub trait IngressRateLimiter: Send + Sync {
    /// Count one interaction for `identity`, or reject it when over quota
    async fn check_and_record(&self, identity: &str) -> Result<(), PipelineError>;
}

/// Per-identity quota over the shared SQLite store
pub struct SqlRateLimiter {
    pool: SqlitePool,
    limit: i64,
    window: Duration,
}

impl SqlRateLimiter {
    pub fn new(pool: SqlitePool, limit: i64, window: Duration) -> Self {
        Self {
            pool,
            limit,
            window,
        }
    }

    fn now_ms() -> Result<i64> {
        Ok(SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("Failed to get current time")?
            .as_millis() as i64)
    }

    async fn count_since(&self, identity: &str, since: i64) -> Result<i64> {
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM rate_limits WHERE identity = ? AND timestamp >= ?",
        )
        .bind(identity)
        .bind(since)
        .fetch_one(&self.pool)
        .await
        .context("Failed to count operations")?;

        Ok(result.0)
    }

    /// Insert one entry only if the window still has room
    ///
    /// Count and insert are one statement, so SQLite takes the write lock
    /// before counting and concurrent callers cannot overshoot the limit.
    async fn try_record(&self, identity: &str, now: i64, since: i64) -> Result<bool> {
        let result = sqlx::query(
            "INSERT INTO rate_limits (identity, timestamp) \
             SELECT ?, ? \
             WHERE (SELECT COUNT(*) FROM rate_limits WHERE identity = ? AND timestamp >= ?) < ?",
        )
        .bind(identity)
        .bind(now)
        .bind(identity)
        .bind(since)
        .bind(self.limit)
        .execute(&self.pool)
        .await
        .context("Failed to record operation")?;

        Ok(result.rows_affected() == 1)
    }

    async fn cleanup(&self, cutoff: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM rate_limits WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .context("Failed to clean up old entries")?;

        if result.rows_affected() > 0 {
            debug!(
                "Cleaned up {} old rate limit entries",
                result.rows_affected()
            );
        }
        Ok(())
    }

    /// Operations recorded for `identity` within the current window
    pub async fn current_count(&self, identity: &str) -> Result<i64, PipelineError> {
        let now = Self::now_ms().map_err(PipelineError::persistence)?;
        let since = now - self.window.as_millis() as i64;
        self.count_since(identity, since)
            .await
            .map_err(PipelineError::persistence)
    }

    async fn check_inner(&self, identity: &str) -> Result<Option<i64>> {
        let now = Self::now_ms()?;
        let since = now - self.window.as_millis() as i64;

        if !self.try_record(identity, now, since).await? {
            let count = self.count_since(identity, since).await?;
            return Ok(Some(count));
        }

        debug!("Rate limit entry recorded for {} (limit {})", identity, self.limit);
        self.cleanup(since).await?;
        Ok(None)
    }
}

#[async_trait]
impl IngressRateLimiter for SqlRateLimiter {
    async fn check_and_record(&self, identity: &str) -> Result<(), PipelineError> {
        match self
            .check_inner(identity)
            .await
            .map_err(PipelineError::persistence)?
        {
            None => Ok(()),
            Some(count) => {
                warn!(
                    "Rate limit exceeded for {}: {}/{}",
                    identity, count, self.limit
                );
                Err(PipelineError::RateLimited {
                    identity: identity.to_string(),
                    limit: self.limit,
                    window_secs: self.window.as_secs(),
                })
            }
        }
    }
}
