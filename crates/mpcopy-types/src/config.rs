//! Configuration value types for mpcopy
//!
//! Small validated newtypes shared by the config loader, the engine and the CLI.

use serde::{Deserialize, Serialize};

/// Worker count with validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct ThreadCount(usize);

impl ThreadCount {
    /// Minimum thread count
    pub const MIN: usize = 1;
    /// Maximum thread count
    pub const MAX: usize = 256;
    /// Default thread count
    pub const DEFAULT: usize = 1;

    /// Create a new thread count with validation
    pub fn new(count: usize) -> Result<Self, String> {
        if count < Self::MIN {
            Err(format!("Thread count {} is below minimum {}", count, Self::MIN))
        } else if count > Self::MAX {
            Err(format!("Thread count {} exceeds maximum {}", count, Self::MAX))
        } else {
            Ok(Self(count))
        }
    }

    /// Get the thread count value
    pub fn get(self) -> usize {
        self.0
    }
}

impl Default for ThreadCount {
    fn default() -> Self {
        Self(Self::DEFAULT)
    }
}

impl TryFrom<usize> for ThreadCount {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ThreadCount> for usize {
    fn from(value: ThreadCount) -> Self {
        value.0
    }
}

/// How failed items are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Extra attempts an item gets within the same run after a failure
    pub retries_per_run: u32,
    /// Persisted attempt count at which an item is quarantined
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(retries_per_run: u32, max_attempts: Option<u32>) -> Result<Self, String> {
        if max_attempts == Some(0) {
            return Err("max_attempts must be at least 1 when set".to_string());
        }
        Ok(Self {
            retries_per_run,
            max_attempts,
        })
    }

    /// Whether an item with `attempts` recorded failures is quarantined
    pub fn is_quarantined(&self, attempts: u32) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
    }

    /// Whether an item that has failed `failures_this_run` times may be retried now
    pub fn allows_in_run_retry(&self, failures_this_run: u32, attempts: u32) -> bool {
        failures_this_run <= self.retries_per_run && !self.is_quarantined(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(16, true)]
    #[case(256, true)]
    #[case(257, false)]
    fn test_thread_count_bounds(#[case] count: usize, #[case] valid: bool) {
        assert_eq!(ThreadCount::new(count).is_ok(), valid);
    }

    #[test]
    fn test_thread_count_default_is_one() {
        assert_eq!(ThreadCount::default().get(), 1);
    }

    #[test]
    fn test_thread_count_serde_rejects_zero() {
        let parsed: std::result::Result<ThreadCount, _> = serde_json::from_str("0");
        assert!(parsed.is_err());
        let parsed: ThreadCount = serde_json::from_str("8").unwrap();
        assert_eq!(parsed.get(), 8);
    }

    #[test]
    fn test_unbounded_retry_never_quarantines() {
        let policy = RetryPolicy::default();
        assert!(!policy.is_quarantined(u32::MAX));
        assert!(!policy.allows_in_run_retry(1, 5));
    }

    #[test]
    fn test_quarantine_threshold() {
        let policy = RetryPolicy::new(2, Some(3)).unwrap();
        assert!(!policy.is_quarantined(2));
        assert!(policy.is_quarantined(3));
        assert!(policy.allows_in_run_retry(2, 2));
        assert!(!policy.allows_in_run_retry(3, 2));
        assert!(!policy.allows_in_run_retry(1, 3));
    }

    #[test]
    fn test_zero_max_attempts_rejected() {
        assert!(RetryPolicy::new(0, Some(0)).is_err());
    }
}
