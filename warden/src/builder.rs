//! Builder pattern for constructing Warden instances
//!
//! This module provides a type-safe builder for creating [`Warden`] instances with
//! compile-time validation of storage configuration.
//!
//! # Example
//!
//! ```rust,no_run
//! use warden::{TokenConfig, WardenBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build with SQLite and auto-migration
//!     let warden = WardenBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .with_token_config(TokenConfig::new_random_hs256())
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     // Or keep counters in memory
//!     let warden = WardenBuilder::new()
//!         .with_in_memory_storage()
//!         .with_token_config(TokenConfig::new_random_hs256())
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use warden_core::{
    BruteForceConfig, Clock, InMemoryRepositoryProvider, RepositoryProvider, SystemClock,
    TokenConfig, error::utilities::RequiredFieldExt,
};

use crate::Warden;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur when building a Warden instance.
#[derive(Debug, thiserror::Error)]
pub enum WardenBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Invalid configuration provided
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

// ============================================================================
// Type-State Markers
// ============================================================================

/// Marker type indicating no storage has been configured yet.
///
/// This is the initial state of [`WardenBuilder`].
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

// ============================================================================
// Builder Implementation
// ============================================================================

/// A type-safe builder for constructing [`Warden`] instances.
///
/// Storage must be chosen before [`build`](WardenBuilder::build) becomes
/// available. A token configuration is required at build time.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build
pub struct WardenBuilder<Storage> {
    storage: Storage,
    brute_force_config: BruteForceConfig,
    token_config: Option<TokenConfig>,
    clock: Arc<dyn Clock>,
    apply_migrations: bool,
}

impl Default for WardenBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl WardenBuilder<NoStorage> {
    /// Create a new builder with default configuration.
    ///
    /// # Defaults
    ///
    /// - Brute force protection: Enabled (5 attempts, 10 minute block, fail closed)
    /// - Token configuration: none, must be provided
    /// - Clock: system clock
    /// - Apply migrations: false
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            brute_force_config: BruteForceConfig::default(),
            token_config: None,
            clock: Arc::new(SystemClock),
            apply_migrations: false,
        }
    }

    /// Use an existing repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> WardenBuilder<WithStorage<R>> {
        WardenBuilder {
            storage: WithStorage { repositories },
            brute_force_config: self.brute_force_config,
            token_config: self.token_config,
            clock: self.clock,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Keep failure counters in process memory.
    pub fn with_in_memory_storage(self) -> WardenBuilder<WithStorage<InMemoryRepositoryProvider>> {
        self.with_repositories(Arc::new(InMemoryRepositoryProvider::new()))
    }
}

#[cfg(feature = "sqlite")]
impl WardenBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// # Arguments
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<WardenBuilder<WithStorage<crate::sqlite::SqliteRepositoryProvider>>, WardenBuilderError>
    {
        let repositories = crate::sqlite::SqliteRepositoryProvider::connect(url)
            .await
            .map_err(|e| WardenBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repositories(Arc::new(repositories)))
    }

    /// Configure SQLite storage with an existing connection pool.
    pub fn with_sqlite_pool(
        self,
        pool: sqlx::SqlitePool,
    ) -> WardenBuilder<WithStorage<crate::sqlite::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(crate::sqlite::SqliteRepositoryProvider::new(pool)))
    }
}

// ============================================================================
// Configuration Methods (available in every state)
// ============================================================================

impl<Storage> WardenBuilder<Storage> {
    /// Configure brute force protection settings.
    ///
    /// Default: Enabled with 5 attempts and a 10 minute block
    pub fn with_brute_force_protection(mut self, config: BruteForceConfig) -> Self {
        self.brute_force_config = config;
        self
    }

    /// Read brute force protection settings from `WARDEN_GUARD_*` variables.
    pub fn with_brute_force_protection_from_env(mut self) -> Result<Self, WardenBuilderError> {
        self.brute_force_config = BruteForceConfig::from_env()
            .map_err(|e| WardenBuilderError::InvalidConfiguration(e.to_string()))?;
        Ok(self)
    }

    /// Configure token signing, lifetimes and the cookie.
    pub fn with_token_config(mut self, config: TokenConfig) -> Self {
        self.token_config = Some(config);
        self
    }

    /// Read the token configuration from `WARDEN_TOKEN_*` and `WARDEN_COOKIE_*` variables.
    pub fn with_token_config_from_env(mut self) -> Result<Self, WardenBuilderError> {
        let config = TokenConfig::from_env()
            .map_err(|e| WardenBuilderError::InvalidConfiguration(e.to_string()))?;
        self.token_config = Some(config);
        Ok(self)
    }

    /// Replace the time source shared by the guard and the token issuer.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set whether to automatically apply database migrations during build.
    ///
    /// Default: false
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }
}

impl<R: RepositoryProvider> WardenBuilder<WithStorage<R>> {
    /// Build the Warden instance.
    ///
    /// Validates the configuration and, if `apply_migrations(true)` was called,
    /// runs migrations before returning.
    pub async fn build(self) -> Result<Warden<R>, WardenBuilderError> {
        let token_config = self
            .token_config
            .require_field("token configuration")
            .map_err(|e| WardenBuilderError::InvalidConfiguration(e.to_string()))?;
        self.brute_force_config
            .validate()
            .map_err(|e| WardenBuilderError::InvalidConfiguration(e.to_string()))?;

        if self.apply_migrations {
            self.storage
                .repositories
                .migrate()
                .await
                .map_err(|e| WardenBuilderError::Migration(e.to_string()))?;
        }

        Warden::from_parts(
            self.storage.repositories,
            self.brute_force_config,
            token_config,
            self.clock,
        )
        .map_err(|e| WardenBuilderError::InvalidConfiguration(e.to_string()))
    }
}
