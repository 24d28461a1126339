//! Attempt records, lockout configuration and block status
//!
//! | Type | Purpose |
//! | ---- | ------- |
//! | [`AttemptRecord`] | Per-key failure counter and block deadline |
//! | [`BruteForceConfig`] | Threshold, block duration, retention and store failure policy |
//! | [`LockoutRule`] | The part of the config a store needs to apply a failure atomically |
//! | [`BlockStatus`] | Answer to "is this key blocked right now, and for how long" |

pub mod memory;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub use memory::InMemoryAttemptRepository;

/// Failure counter for one attempt key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Failed attempts since the last reset.
    pub failure_count: u32,

    /// The instant the current (or most recent) block ends.
    pub blocked_until: Option<DateTime<Utc>>,

    /// When the most recent failure was recorded.
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Whether a block is active at `now`. A block ends exactly at `blocked_until`.
    pub fn is_blocked_at(&self, now: DateTime<Utc>) -> bool {
        self.blocked_until.is_some_and(|until| until > now)
    }

    /// Apply one failed attempt observed at `now`.
    ///
    /// The count always increments. A block starts when the new count reaches the
    /// threshold and no block is active; an active block is never extended.
    pub fn register_failure(&mut self, now: DateTime<Utc>, rule: &LockoutRule) {
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_failure_at = Some(now);

        if self.failure_count >= rule.max_failed_attempts && !self.is_blocked_at(now) {
            self.blocked_until = Some(rule.block_deadline(now));
        }
    }

    /// Whether the failure recorded at `now` is the one that started the current block.
    ///
    /// Stores may keep timestamps at millisecond precision, so the deadline is
    /// compared with that tolerance.
    pub fn started_block_at(&self, now: DateTime<Utc>, rule: &LockoutRule) -> bool {
        self.blocked_until
            .is_some_and(|until| rule.block_deadline(now) - until < Duration::milliseconds(1))
    }
}

/// Threshold and block length applied by a store when recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutRule {
    pub max_failed_attempts: u32,
    pub block_duration: Duration,
}

impl LockoutRule {
    /// End of a block starting at `now`, saturating at the largest representable instant.
    pub fn block_deadline(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.block_duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// What the guard reports when the attempt store cannot be reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Treat the key as blocked for a full block window.
    #[default]
    FailClosed,
    /// Treat the key as not blocked.
    FailOpen,
}

/// Configuration for the brute-force guard.
#[derive(Debug, Clone)]
pub struct BruteForceConfig {
    /// When false the guard never blocks and never records.
    pub enabled: bool,

    /// Failures that trigger a block.
    pub max_failed_attempts: u32,

    /// How long a key stays blocked once the threshold is reached.
    pub block_duration: Duration,

    /// How long an unblocked record is kept after its last failure before cleanup.
    pub retention_period: Duration,

    /// Behaviour when the attempt store errors.
    pub store_failure_policy: StoreFailurePolicy,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_failed_attempts: 5,
            block_duration: Duration::minutes(10),
            retention_period: Duration::days(7),
            store_failure_policy: StoreFailurePolicy::FailClosed,
        }
    }
}

impl BruteForceConfig {
    /// A configuration that turns the guard into a no-op.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_max_failed_attempts(mut self, max_failed_attempts: u32) -> Self {
        self.max_failed_attempts = max_failed_attempts;
        self
    }

    pub fn with_block_duration(mut self, block_duration: Duration) -> Self {
        self.block_duration = block_duration;
        self
    }

    pub fn with_retention_period(mut self, retention_period: Duration) -> Self {
        self.retention_period = retention_period;
        self
    }

    pub fn with_store_failure_policy(mut self, policy: StoreFailurePolicy) -> Self {
        self.store_failure_policy = policy;
        self
    }

    pub fn lockout_rule(&self) -> LockoutRule {
        LockoutRule {
            max_failed_attempts: self.max_failed_attempts,
            block_duration: self.block_duration,
        }
    }

    /// Records whose last failure is older than this instant are stale at `now`.
    pub fn stale_before(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.retention_period)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Check the invariants the guard relies on.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_failed_attempts == 0 {
            return Err(ValidationError::InvalidField(
                "max_failed_attempts must be at least 1".to_string(),
            ));
        }
        if self.block_duration <= Duration::zero() {
            return Err(ValidationError::InvalidField(
                "block_duration must be positive".to_string(),
            ));
        }
        if self.retention_period < Duration::zero() {
            return Err(ValidationError::InvalidField(
                "retention_period must not be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Load the configuration from `WARDEN_GUARD_*` environment variables.
    ///
    /// | Variable | Meaning | Default |
    /// | -------- | ------- | ------- |
    /// | `WARDEN_GUARD_ENABLED` | `true`/`false` | `true` |
    /// | `WARDEN_GUARD_MAX_FAILED_ATTEMPTS` | threshold | `5` |
    /// | `WARDEN_GUARD_BLOCK_MINUTES` | block duration | `10` |
    /// | `WARDEN_GUARD_RETENTION_DAYS` | cleanup retention | `7` |
    /// | `WARDEN_GUARD_STORE_FAILURE` | `closed`/`open` | `closed` |
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`BruteForceConfig::from_env`] with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let enabled = parse_var(&lookup, "WARDEN_GUARD_ENABLED")?.unwrap_or(defaults.enabled);
        let max_failed_attempts = parse_var(&lookup, "WARDEN_GUARD_MAX_FAILED_ATTEMPTS")?
            .unwrap_or(defaults.max_failed_attempts);
        let block_duration =
            parse_duration_var(&lookup, "WARDEN_GUARD_BLOCK_MINUTES", Duration::try_minutes)?
                .unwrap_or(defaults.block_duration);
        let retention_period =
            parse_duration_var(&lookup, "WARDEN_GUARD_RETENTION_DAYS", Duration::try_days)?
                .unwrap_or(defaults.retention_period);
        let store_failure_policy = match lookup("WARDEN_GUARD_STORE_FAILURE")
            .map(|value| value.trim().to_lowercase())
            .as_deref()
        {
            None => defaults.store_failure_policy,
            Some("closed") => StoreFailurePolicy::FailClosed,
            Some("open") => StoreFailurePolicy::FailOpen,
            Some(other) => {
                return Err(ValidationError::InvalidField(format!(
                    "WARDEN_GUARD_STORE_FAILURE must be `open` or `closed`, got `{other}`"
                )));
            }
        };

        let config = Self {
            enabled,
            max_failed_attempts,
            block_duration,
            retention_period,
            store_failure_policy,
        };
        config.validate()?;
        Ok(config)
    }
}

pub(crate) fn parse_var<F, T>(lookup: &F, name: &str) -> Result<Option<T>, ValidationError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            ValidationError::InvalidField(format!("{name} has an unparseable value `{raw}`"))
        }),
    }
}

/// Parse an integer variable and turn it into a duration with `unit`.
///
/// Values outside the range `unit` can represent are an invalid field.
pub(crate) fn parse_duration_var<F>(
    lookup: &F,
    name: &str,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Option<Duration>, ValidationError>
where
    F: Fn(&str) -> Option<String>,
{
    parse_var::<_, i64>(lookup, name)?
        .map(|value| {
            unit(value).ok_or_else(|| {
                ValidationError::InvalidField(format!("{name} is out of range: `{value}`"))
            })
        })
        .transpose()
}

/// Block state of one key at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockStatus {
    /// Whether login attempts for the key must be refused.
    pub is_blocked: bool,

    /// Failures currently counted against the key.
    pub failed_attempts: u32,

    /// End of the active block, if any.
    pub blocked_until: Option<DateTime<Utc>>,

    /// Time left until the block ends; zero when not blocked.
    pub remaining_window: Duration,
}

impl BlockStatus {
    /// A status that is not blocked.
    pub fn unblocked(failed_attempts: u32) -> Self {
        Self {
            is_blocked: false,
            failed_attempts,
            blocked_until: None,
            remaining_window: Duration::zero(),
        }
    }

    /// Derive the status of a key from its record (if any) at `now`.
    pub fn evaluate(record: Option<&AttemptRecord>, now: DateTime<Utc>) -> Self {
        let Some(record) = record else {
            return Self::unblocked(0);
        };

        match record.blocked_until {
            Some(until) if until > now => Self {
                is_blocked: true,
                failed_attempts: record.failure_count,
                blocked_until: Some(until),
                remaining_window: until.signed_duration_since(now),
            },
            _ => Self::unblocked(record.failure_count),
        }
    }

    /// Remaining block time in whole minutes, rounded up and never below one.
    ///
    /// `None` when the key is not blocked.
    pub fn retry_after_minutes(&self) -> Option<i64> {
        if !self.is_blocked {
            return None;
        }
        let millis = self.remaining_window.num_milliseconds();
        Some((millis.saturating_add(59_999) / 60_000).max(1))
    }

    /// Remaining block time in whole seconds, rounded up and never below one.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        if !self.is_blocked {
            return None;
        }
        let millis = self.remaining_window.num_milliseconds();
        Some((millis.saturating_add(999) / 1_000).max(1))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn rule(max_failed_attempts: u32) -> LockoutRule {
        LockoutRule {
            max_failed_attempts,
            block_duration: Duration::minutes(10),
        }
    }

    #[test]
    fn test_register_failure_blocks_at_threshold() {
        let now = Utc::now();
        let mut record = AttemptRecord::default();

        for _ in 0..2 {
            record.register_failure(now, &rule(3));
        }
        assert!(!record.is_blocked_at(now));

        record.register_failure(now, &rule(3));
        assert_eq!(record.failure_count, 3);
        assert_eq!(record.blocked_until, Some(now + Duration::minutes(10)));
    }

    #[test]
    fn test_register_failure_does_not_extend_active_block() {
        let now = Utc::now();
        let mut record = AttemptRecord::default();
        record.register_failure(now, &rule(1));
        let first_deadline = record.blocked_until;

        record.register_failure(now + Duration::minutes(5), &rule(1));
        assert_eq!(record.failure_count, 2);
        assert_eq!(record.blocked_until, first_deadline);
    }

    #[test]
    fn test_register_failure_after_expiry_reblocks() {
        let now = Utc::now();
        let mut record = AttemptRecord::default();
        record.register_failure(now, &rule(1));

        let later = now + Duration::minutes(11);
        assert!(!record.is_blocked_at(later));

        record.register_failure(later, &rule(1));
        assert_eq!(record.blocked_until, Some(later + Duration::minutes(10)));
    }

    #[test]
    fn test_huge_block_duration_saturates() {
        let now = Utc::now();
        let rule = LockoutRule {
            max_failed_attempts: 1,
            block_duration: Duration::days(100_000_000),
        };
        let mut record = AttemptRecord::default();
        record.register_failure(now, &rule);

        assert_eq!(record.blocked_until, Some(DateTime::<Utc>::MAX_UTC));
        assert!(record.started_block_at(now, &rule));

        let status = BlockStatus::evaluate(Some(&record), now);
        assert!(status.is_blocked);
        assert!(status.retry_after_minutes().unwrap() > 0);
        assert!(status.retry_after_seconds().unwrap() > 0);
    }

    #[test]
    fn test_started_block_at_tolerates_millisecond_storage() {
        let now = Utc::now();
        let rule = rule(1);
        let truncated = DateTime::<Utc>::from_timestamp_millis(
            rule.block_deadline(now).timestamp_millis(),
        )
        .unwrap();
        let record = AttemptRecord {
            failure_count: 1,
            blocked_until: Some(truncated),
            last_failure_at: Some(now),
        };
        assert!(record.started_block_at(now, &rule));

        // A later failure inside the same block did not start it.
        assert!(!record.started_block_at(now + Duration::minutes(1), &rule));
        assert!(!AttemptRecord::default().started_block_at(now, &rule));
    }

    #[test]
    fn test_stale_before_saturates() {
        let now = Utc::now();
        let config = BruteForceConfig::default();
        assert_eq!(config.stale_before(now), now - Duration::days(7));

        let config = config.with_retention_period(Duration::days(100_000_000));
        assert_eq!(config.stale_before(now), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_block_ends_exactly_at_deadline() {
        let now = Utc::now();
        let record = AttemptRecord {
            failure_count: 5,
            blocked_until: Some(now),
            last_failure_at: Some(now),
        };
        assert!(!record.is_blocked_at(now));
        assert!(record.is_blocked_at(now - Duration::milliseconds(1)));
    }

    #[test]
    fn test_evaluate_missing_record_is_unblocked() {
        let status = BlockStatus::evaluate(None, Utc::now());
        assert!(!status.is_blocked);
        assert_eq!(status.failed_attempts, 0);
        assert_eq!(status.retry_after_minutes(), None);
    }

    #[test]
    fn test_retry_after_minutes_rounds_up() {
        let now = Utc::now();
        let record = AttemptRecord {
            failure_count: 5,
            blocked_until: Some(now + Duration::seconds(61)),
            last_failure_at: Some(now),
        };
        let status = BlockStatus::evaluate(Some(&record), now);
        assert_eq!(status.retry_after_minutes(), Some(2));
        assert_eq!(status.retry_after_seconds(), Some(61));

        let record = AttemptRecord {
            blocked_until: Some(now + Duration::milliseconds(1)),
            ..record
        };
        let status = BlockStatus::evaluate(Some(&record), now);
        assert_eq!(status.retry_after_minutes(), Some(1));
    }

    #[test]
    fn test_default_config() {
        let config = BruteForceConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_failed_attempts, 5);
        assert_eq!(config.block_duration, Duration::minutes(10));
        assert_eq!(config.store_failure_policy, StoreFailurePolicy::FailClosed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let config = BruteForceConfig::default().with_max_failed_attempts(0);
        assert!(config.validate().is_err());

        let config = BruteForceConfig::default().with_block_duration(Duration::zero());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_reads_variables() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("WARDEN_GUARD_MAX_FAILED_ATTEMPTS", "3"),
            ("WARDEN_GUARD_BLOCK_MINUTES", "15"),
            ("WARDEN_GUARD_STORE_FAILURE", "Open"),
        ]);
        let config =
            BruteForceConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string())).unwrap();

        assert!(config.enabled);
        assert_eq!(config.max_failed_attempts, 3);
        assert_eq!(config.block_duration, Duration::minutes(15));
        assert_eq!(config.retention_period, Duration::days(7));
        assert_eq!(config.store_failure_policy, StoreFailurePolicy::FailOpen);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let result = BruteForceConfig::from_lookup(|name| {
            (name == "WARDEN_GUARD_MAX_FAILED_ATTEMPTS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ValidationError::InvalidField(_))));

        let result = BruteForceConfig::from_lookup(|name| {
            (name == "WARDEN_GUARD_STORE_FAILURE").then(|| "sideways".to_string())
        });
        assert!(result.is_err());

        let result = BruteForceConfig::from_lookup(|name| {
            (name == "WARDEN_GUARD_BLOCK_MINUTES").then(|| "999999999999999999".to_string())
        });
        assert!(matches!(result, Err(ValidationError::InvalidField(_))));

        let result = BruteForceConfig::from_lookup(|name| {
            (name == "WARDEN_GUARD_RETENTION_DAYS").then(|| "-999999999999999999".to_string())
        });
        assert!(matches!(result, Err(ValidationError::InvalidField(_))));
    }
}
