//! Repository traits for data access layer
//!
//! This module defines the storage interfaces the guard uses. A storage backend
//! implements [`AttemptRepository`] for the per-key counters and exposes it
//! through [`RepositoryProvider`], which adds lifecycle methods for migrations
//! and health checks.

pub mod adapter;
pub mod attempt;

pub use adapter::AttemptRepositoryAdapter;
pub use attempt::AttemptRepository;

use async_trait::async_trait;

use crate::{Error, storage::InMemoryAttemptRepository};

/// Provider trait that storage implementations must implement.
///
/// # Example
///
/// ```rust,ignore
/// use warden_core::repositories::*;
///
/// struct MyStorage { attempts: MyAttemptRepository }
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     type AttemptRepo = MyAttemptRepository;
///     fn attempts(&self) -> &Self::AttemptRepo { &self.attempts }
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: Send + Sync + 'static {
    /// The attempt repository implementation type
    type AttemptRepo: AttemptRepository;

    /// Get the attempt repository
    fn attempts(&self) -> &Self::AttemptRepo;

    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}

/// Process-local provider. Counters vanish when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryRepositoryProvider {
    attempts: InMemoryAttemptRepository,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RepositoryProvider for InMemoryRepositoryProvider {
    type AttemptRepo = InMemoryAttemptRepository;

    fn attempts(&self) -> &Self::AttemptRepo {
        &self.attempts
    }

    async fn migrate(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}
