use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    key::AttemptKey,
    repositories::{AttemptRepository, RepositoryProvider},
    storage::{AttemptRecord, LockoutRule},
};

/// Adapter that wraps a RepositoryProvider and implements [`AttemptRepository`]
pub struct AttemptRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AttemptRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AttemptRepository for AttemptRepositoryAdapter<R> {
    async fn find(&self, key: &AttemptKey) -> Result<Option<AttemptRecord>, Error> {
        self.provider.attempts().find(key).await
    }

    async fn record_failure(
        &self,
        key: &AttemptKey,
        at: DateTime<Utc>,
        rule: &LockoutRule,
    ) -> Result<AttemptRecord, Error> {
        self.provider.attempts().record_failure(key, at, rule).await
    }

    async fn clear(&self, key: &AttemptKey) -> Result<bool, Error> {
        self.provider.attempts().clear(key).await
    }

    async fn purge_stale(
        &self,
        last_failure_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        self.provider
            .attempts()
            .purge_stale(last_failure_before, now)
            .await
    }
}
