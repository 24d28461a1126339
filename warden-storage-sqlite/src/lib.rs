//! SQLite storage backend for warden
//!
//! Persists brute-force counters in a `login_attempts` table keyed by
//! `(user_id, client_addr)`, so blocks survive restarts and are shared by every
//! process using the same database file.
//!
//! ```rust,ignore
//! use warden_storage_sqlite::SqliteRepositoryProvider;
//!
//! let provider = SqliteRepositoryProvider::connect("sqlite://warden.db?mode=rwc").await?;
//! provider.migrate().await?;
//! ```

pub mod migrations;
pub mod repositories;

pub use repositories::SqliteAttemptRepository;

use async_trait::async_trait;
use sqlx::SqlitePool;
use warden_core::{Error, error::StorageError, repositories::RepositoryProvider};

use crate::migrations::SqliteMigrationManager;

/// Repository provider implementation for SQLite
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    attempts: SqliteAttemptRepository,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let attempts = SqliteAttemptRepository::new(pool.clone());
        Self { pool, attempts }
    }

    /// Open a pool for `database_url` and wrap it.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = SqlitePool::connect(database_url).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to SQLite");
            Error::Storage(StorageError::Connection(e.to_string()))
        })?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    type AttemptRepo = SqliteAttemptRepository;

    fn attempts(&self) -> &Self::AttemptRepo {
        &self.attempts
    }

    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&migrations::all()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;
        Ok(())
    }
}
