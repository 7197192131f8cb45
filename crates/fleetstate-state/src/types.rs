//! Configuration types for the state layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How many times a transaction is attempted, and how long to wait between
/// attempts, before giving up with `StateError::ExcessiveContention`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts. `None` retries until the store accepts.
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "RetryPolicy::default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the delay between retries, in milliseconds.
    #[serde(default = "RetryPolicy::default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_backoff_ms: Self::default_initial_backoff_ms(),
            max_backoff_ms: Self::default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    #[allow(clippy::unnecessary_wraps)]
    const fn default_max_attempts() -> Option<u32> {
        Some(64)
    }

    const fn default_initial_backoff_ms() -> u64 {
        1
    }

    const fn default_max_backoff_ms() -> u64 {
        100
    }

    /// A policy that never gives up and never waits.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            max_attempts: None,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Returns true if attempt number `attempt` (zero-based) may run.
    #[must_use]
    pub fn allows(&self, attempt: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempt < max,
            None => true,
        }
    }

    /// Delay before attempt number `attempt` (zero-based).
    ///
    /// The first attempt runs immediately; after that the delay starts at
    /// `initial_backoff_ms` and doubles, capped at `max_backoff_ms`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
        let ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for a [`State`](crate::State).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    /// Retry policy applied to every lifecycle transaction.
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl StateConfig {
    /// Create a config with the given retry policy.
    #[must_use]
    pub const fn with_retry(retry: RetryPolicy) -> Self {
        Self { retry }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, Some(64));
        assert!(policy.allows(63));
        assert!(!policy.allows(64));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: Some(10),
            initial_backoff_ms: 5,
            max_backoff_ms: 30,
        };
        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(5));
        assert_eq!(policy.backoff(2), Duration::from_millis(10));
        assert_eq!(policy.backoff(3), Duration::from_millis(20));
        assert_eq!(policy.backoff(4), Duration::from_millis(30));
        assert_eq!(policy.backoff(200), Duration::from_millis(30));
    }

    #[test]
    fn unbounded_never_stops() {
        let policy = RetryPolicy::unbounded();
        assert!(policy.allows(u32::MAX));
        assert_eq!(policy.backoff(7), Duration::ZERO);
    }

    #[test]
    fn config_from_partial_json() {
        let config: StateConfig =
            serde_json::from_str(r#"{"retry": {"max_attempts": 3}}"#).unwrap();
        assert_eq!(config.retry.max_attempts, Some(3));
        assert_eq!(config.retry.initial_backoff_ms, 1);
        assert_eq!(config.retry.max_backoff_ms, 100);

        let config: StateConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, StateConfig::default());
    }
}
