//! SQLite implementation of the attempt repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use warden_core::{
    Error,
    error::utilities::DatabaseResultExt,
    key::AttemptKey,
    repositories::AttemptRepository,
    storage::{AttemptRecord, LockoutRule},
};

/// Counts one failure in a single statement.
///
/// SQLite evaluates every `SET` expression against the old row, so
/// `failure_count + 1` below is the new count and `blocked_until` is the
/// previous deadline. An active deadline is left alone.
const RECORD_FAILURE_SQL: &str = r#"
    INSERT INTO login_attempts (user_id, client_addr, failure_count, blocked_until, last_failure_at)
    VALUES (?1, ?2, 1, CASE WHEN 1 >= ?3 THEN ?4 ELSE NULL END, ?5)
    ON CONFLICT(user_id, client_addr) DO UPDATE SET
        failure_count = MIN(failure_count + 1, 4294967295),
        blocked_until = CASE
            WHEN blocked_until IS NOT NULL AND blocked_until > ?5 THEN blocked_until
            WHEN failure_count + 1 >= ?3 THEN ?4
            ELSE blocked_until
        END,
        last_failure_at = ?5
    RETURNING failure_count, blocked_until, last_failure_at
"#;

/// SQLite repository for per-key failure counters.
pub struct SqliteAttemptRepository {
    pool: SqlitePool,
}

impl SqliteAttemptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, sqlx::FromRow)]
struct SqliteAttemptRow {
    failure_count: i64,
    blocked_until: Option<i64>,
    last_failure_at: Option<i64>,
}

impl From<SqliteAttemptRow> for AttemptRecord {
    fn from(row: SqliteAttemptRow) -> Self {
        AttemptRecord {
            failure_count: u32::try_from(row.failure_count).unwrap_or(u32::MAX),
            blocked_until: row.blocked_until.and_then(DateTime::from_timestamp_millis),
            last_failure_at: row.last_failure_at.and_then(DateTime::from_timestamp_millis),
        }
    }
}

#[async_trait]
impl AttemptRepository for SqliteAttemptRepository {
    async fn find(&self, key: &AttemptKey) -> Result<Option<AttemptRecord>, Error> {
        let row = sqlx::query_as::<_, SqliteAttemptRow>(
            r#"
            SELECT failure_count, blocked_until, last_failure_at
            FROM login_attempts
            WHERE user_id = ? AND client_addr = ?
            "#,
        )
        .bind(key.user_id())
        .bind(key.client_addr())
        .fetch_optional(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = %e, key = %key, "Failed to load attempt record"))
        .map_db_err_with_context("Failed to load attempt record")?;

        Ok(row.map(Into::into))
    }

    async fn record_failure(
        &self,
        key: &AttemptKey,
        at: DateTime<Utc>,
        rule: &LockoutRule,
    ) -> Result<AttemptRecord, Error> {
        let now = at.timestamp_millis();
        let block_until = rule.block_deadline(at).timestamp_millis();

        let row = sqlx::query_as::<_, SqliteAttemptRow>(RECORD_FAILURE_SQL)
            .bind(key.user_id())
            .bind(key.client_addr())
            .bind(i64::from(rule.max_failed_attempts))
            .bind(block_until)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .inspect_err(|e| tracing::error!(error = %e, key = %key, "Failed to record failed attempt"))
            .map_db_err_with_context("Failed to record failed attempt")?;

        Ok(row.into())
    }

    async fn clear(&self, key: &AttemptKey) -> Result<bool, Error> {
        let result =
            sqlx::query("DELETE FROM login_attempts WHERE user_id = ? AND client_addr = ?")
                .bind(key.user_id())
                .bind(key.client_addr())
                .execute(&self.pool)
                .await
                .inspect_err(|e| tracing::error!(error = %e, key = %key, "Failed to clear attempts"))
                .map_db_err_with_context("Failed to clear attempts")?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_stale(
        &self,
        last_failure_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        // Blocked rows survive regardless of age.
        let result = sqlx::query(
            r#"
            DELETE FROM login_attempts
            WHERE (last_failure_at IS NULL OR last_failure_at < ?1)
            AND (blocked_until IS NULL OR blocked_until <= ?2)
            "#,
        )
        .bind(last_failure_before.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = %e, "Failed to purge stale attempts"))
        .map_db_err_with_context("Failed to purge stale attempts")?;

        Ok(result.rows_affected())
    }
}
