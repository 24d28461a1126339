//! Versioned schema migrations for the SQLite store.
//!
//! Applied versions are tracked in `_warden_migrations`. Each migration runs in
//! its own transaction together with the bookkeeping insert, so a failed
//! migration leaves no trace.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, MigrationError>;

#[async_trait]
pub trait Migration: Send + Sync {
    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;

    /// Execute the migration
    async fn up(&self, conn: &mut SqliteConnection) -> Result<()>;

    /// Rollback the migration
    async fn down(&self, conn: &mut SqliteConnection) -> Result<()>;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

/// Every migration the store needs, in version order.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateLoginAttemptsTable),
        Box::new(CreateLoginAttemptsIndexes),
    ]
}

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub const TABLE_NAME: &'static str = "_warden_migrations";

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tracking table if needed.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            );"#,
            Self::TABLE_NAME
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply every migration that has not been applied yet.
    pub async fn up(&self, migrations: &[Box<dyn Migration>]) -> Result<()> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            migration.up(&mut *tx).await?;

            sqlx::query(&format!(
                "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                Self::TABLE_NAME
            ))
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    /// Roll back applied migrations, newest first.
    pub async fn down(&self, migrations: &[Box<dyn Migration>]) -> Result<()> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;

            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            migration.down(&mut *tx).await?;

            sqlx::query(&format!(
                "DELETE FROM {} WHERE version = ?",
                Self::TABLE_NAME
            ))
            .bind(migration.version())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>> {
        let records = sqlx::query_as::<_, MigrationRecord>(&format!(
            "SELECT version, name, applied_at FROM {} ORDER BY version",
            Self::TABLE_NAME
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn is_applied(&self, version: i64) -> Result<bool> {
        let applied: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
            Self::TABLE_NAME
        ))
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(applied)
    }
}

/// Per-key failure counters. Timestamps are Unix milliseconds.
pub struct CreateLoginAttemptsTable;

#[async_trait]
impl Migration for CreateLoginAttemptsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS login_attempts (
                user_id TEXT NOT NULL,
                client_addr TEXT NOT NULL,
                failure_count INTEGER NOT NULL DEFAULT 0,
                blocked_until INTEGER,
                last_failure_at INTEGER,
                PRIMARY KEY (user_id, client_addr)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DROP TABLE IF EXISTS login_attempts")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateLoginAttemptsIndexes;

#[async_trait]
impl Migration for CreateLoginAttemptsIndexes {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateLoginAttemptsIndexes"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_login_attempts_last_failure_at ON login_attempts(last_failure_at)",
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<()> {
        sqlx::query("DROP INDEX IF EXISTS idx_login_attempts_last_failure_at")
            .execute(conn)
            .await?;
        Ok(())
    }
}
