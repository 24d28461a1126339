//! Brute-force guard for per-(user, client) login throttling.
//!
//! The guard counts failed logins per [`AttemptKey`] and refuses further attempts
//! for a cooldown window once the configured threshold is reached.
//!
//! # Lifecycle of a key
//!
//! | State | Entered by | Check result |
//! | ----- | ---------- | ------------ |
//! | Normal | no record, or after [`reset`](BruteForceGuard::reset) | not blocked |
//! | Blocked | failure count reaching the threshold | blocked, with remaining window |
//! | Normal-but-counted | block window elapsing | not blocked, count retained |
//!
//! A failure recorded while blocked is counted but does not move the deadline.
//! A failure recorded in Normal-but-counted starts a new block at once, because
//! the retained count already meets the threshold.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_core::{AttemptKey, BruteForceConfig, BruteForceGuard, InMemoryAttemptRepository};
//!
//! let guard = BruteForceGuard::new(
//!     Arc::new(InMemoryAttemptRepository::new()),
//!     BruteForceConfig::default(),
//! );
//!
//! let key = AttemptKey::new("alice", "203.0.113.5")?;
//! let status = guard.check_and_handle_block(&key).await;
//! if status.is_blocked {
//!     // refuse the login, tell the user to retry in status.retry_after_minutes()
//! }
//! ```

use std::sync::Arc;

use crate::{
    Error,
    clock::{Clock, SystemClock},
    key::AttemptKey,
    repositories::AttemptRepository,
    storage::{BlockStatus, BruteForceConfig, StoreFailurePolicy},
};

/// Cleanup runs hourly unless told otherwise.
const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

/// Throttles repeated failed logins per attempt key.
///
/// # Thread Safety
///
/// The guard is `Send + Sync` and is meant to be shared behind an `Arc`. All
/// per-key mutation is delegated to the repository, which applies each update
/// atomically for that key.
pub struct BruteForceGuard<R: AttemptRepository> {
    repository: Arc<R>,
    config: BruteForceConfig,
    clock: Arc<dyn Clock>,
}

impl<R: AttemptRepository> BruteForceGuard<R> {
    /// Create a guard that reads the system clock.
    pub fn new(repository: Arc<R>, config: BruteForceConfig) -> Self {
        Self::with_clock(repository, config, Arc::new(SystemClock))
    }

    /// Create a guard with an explicit time source.
    pub fn with_clock(repository: Arc<R>, config: BruteForceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &BruteForceConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Report whether `key` is blocked right now.
    ///
    /// This only reads state. A key with no record is simply not blocked.
    pub async fn check_and_handle_block(&self, key: &AttemptKey) -> BlockStatus {
        if !self.config.enabled {
            return BlockStatus::unblocked(0);
        }

        let now = self.clock.now();
        match self.repository.find(key).await {
            Ok(record) => {
                let status = BlockStatus::evaluate(record.as_ref(), now);
                if status.is_blocked {
                    tracing::debug!(
                        key = %key,
                        retry_after_minutes = ?status.retry_after_minutes(),
                        "Login attempt refused while blocked"
                    );
                }
                status
            }
            Err(e) => self.store_failure_status(key, &e),
        }
    }

    /// Count one failed login for `key`.
    ///
    /// Every call is one genuine failure and is counted exactly once. Returns the
    /// status of the key after the failure was applied.
    pub async fn record_failure(&self, key: &AttemptKey) -> BlockStatus {
        if !self.config.enabled {
            return BlockStatus::unblocked(0);
        }

        let now = self.clock.now();
        let rule = self.config.lockout_rule();

        match self.repository.record_failure(key, now, &rule).await {
            Ok(record) => {
                if record.started_block_at(now, &rule) {
                    tracing::warn!(
                        key = %key,
                        failed_attempts = record.failure_count,
                        block_minutes = rule.block_duration.num_minutes(),
                        "Too many failed logins, blocking key"
                    );
                } else {
                    tracing::debug!(
                        key = %key,
                        failed_attempts = record.failure_count,
                        "Recorded failed login"
                    );
                }
                BlockStatus::evaluate(Some(&record), now)
            }
            Err(e) => self.store_failure_status(key, &e),
        }
    }

    /// Forget all failures for `key`.
    ///
    /// Call this only after the credentials for `key` were verified.
    pub async fn reset(&self, key: &AttemptKey) {
        match self.repository.clear(key).await {
            Ok(true) => tracing::debug!(key = %key, "Cleared failed login attempts"),
            Ok(false) => {}
            Err(e) => tracing::error!(
                key = %key,
                error = %e,
                "Failed to clear failed login attempts"
            ),
        }
    }

    /// Clear `key` regardless of its state, e.g. from an admin action.
    ///
    /// Returns `true` if the key was blocked before the call.
    pub async fn unlock(&self, key: &AttemptKey) -> bool {
        let was_blocked = self.check_and_handle_block(key).await.is_blocked;
        self.reset(key).await;
        was_blocked
    }

    /// Delete records that are past retention and not blocked.
    pub async fn purge_stale(&self) -> Result<u64, Error> {
        let now = self.clock.now();
        self.repository
            .purge_stale(self.config.stale_before(now), now)
            .await
    }

    /// Start the hourly background cleanup task.
    ///
    /// The task stops when `shutdown` changes.
    pub fn start_cleanup_task(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        self.start_cleanup_task_with_interval(CLEANUP_INTERVAL, shutdown)
    }

    /// Start the background cleanup task with a custom period.
    pub fn start_cleanup_task_with_interval(
        &self,
        period: std::time::Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let repository = Arc::clone(&self.repository);
        let clock = Arc::clone(&self.clock);
        let config = self.config.clone();

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let now = clock.now();
                        match repository.purge_stale(config.stale_before(now), now).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(
                                    count = count,
                                    "Cleaned up stale failed login records"
                                );
                            }
                            Err(e) => {
                                tracing::warn!(
                                    error = %e,
                                    "Failed to cleanup stale failed login records"
                                );
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down brute force guard cleanup task");
                        break;
                    }
                }
            }
        })
    }

    fn store_failure_status(&self, key: &AttemptKey, error: &Error) -> BlockStatus {
        match self.config.store_failure_policy {
            StoreFailurePolicy::FailClosed => {
                tracing::error!(
                    key = %key,
                    error = %error,
                    "Attempt store unavailable, treating key as blocked"
                );
                let now = self.clock.now();
                BlockStatus {
                    is_blocked: true,
                    failed_attempts: 0,
                    blocked_until: Some(self.config.lockout_rule().block_deadline(now)),
                    remaining_window: self.config.block_duration,
                }
            }
            StoreFailurePolicy::FailOpen => {
                tracing::error!(
                    key = %key,
                    error = %error,
                    "Attempt store unavailable, treating key as not blocked"
                );
                BlockStatus::unblocked(0)
            }
        }
    }
}
