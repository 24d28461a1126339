//! In-process attempt store backed by [`DashMap`].
//!
//! Each key lives in one shard; a failure is applied while holding that shard's
//! write lock, so concurrent failures on the same key never lose an increment
//! and unrelated keys in other shards proceed in parallel.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::{
    Error,
    key::AttemptKey,
    repositories::AttemptRepository,
    storage::{AttemptRecord, LockoutRule},
};

#[derive(Debug, Default)]
pub struct InMemoryAttemptRepository {
    records: DashMap<AttemptKey, AttemptRecord>,
}

impl InMemoryAttemptRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys with a live record.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl AttemptRepository for InMemoryAttemptRepository {
    async fn find(&self, key: &AttemptKey) -> Result<Option<AttemptRecord>, Error> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn record_failure(
        &self,
        key: &AttemptKey,
        at: DateTime<Utc>,
        rule: &LockoutRule,
    ) -> Result<AttemptRecord, Error> {
        let mut entry = self.records.entry(key.clone()).or_default();
        entry.register_failure(at, rule);
        Ok(entry.value().clone())
    }

    async fn clear(&self, key: &AttemptKey) -> Result<bool, Error> {
        Ok(self.records.remove(key).is_some())
    }

    async fn purge_stale(
        &self,
        last_failure_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let mut removed = 0u64;
        self.records.retain(|_, record| {
            let keep = record.is_blocked_at(now)
                || record
                    .last_failure_at
                    .is_some_and(|at| at >= last_failure_before);
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}
