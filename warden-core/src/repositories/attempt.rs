//! Repository trait for brute-force attempt counters.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    key::AttemptKey,
    storage::{AttemptRecord, LockoutRule},
};

/// Storage for per-key failure counters.
///
/// # Atomicity
///
/// [`record_failure`](AttemptRepository::record_failure) must apply the whole
/// update (increment, and block when the threshold is reached) as one atomic
/// step per key. Two concurrent failures on a count of `threshold - 1` must
/// produce `threshold + 1`. Implementations should lock per key or per row,
/// never the whole store.
#[async_trait]
pub trait AttemptRepository: Send + Sync + 'static {
    /// Fetch the record for a key, if one exists.
    async fn find(&self, key: &AttemptKey) -> Result<Option<AttemptRecord>, Error>;

    /// Count one failed attempt observed at `at` and return the updated record.
    ///
    /// Creates the record when absent. See [`AttemptRecord::register_failure`]
    /// for the exact transition.
    async fn record_failure(
        &self,
        key: &AttemptKey,
        at: DateTime<Utc>,
        rule: &LockoutRule,
    ) -> Result<AttemptRecord, Error>;

    /// Delete the record for a key.
    ///
    /// Returns whether a record existed.
    async fn clear(&self, key: &AttemptKey) -> Result<bool, Error>;

    /// Delete records whose last failure is older than `last_failure_before`
    /// and that are not blocked at `now`.
    ///
    /// Returns the number of records deleted.
    async fn purge_stale(
        &self,
        last_failure_before: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<u64, Error>;
}
