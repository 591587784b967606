//! Retry delays for Onload resources whose reconciliation keeps failing.
//!
//! The delay after the n-th consecutive failure is the n-th Fibonacci number
//! times the minimum delay, so the defaults give 5s, 5s, 10s, 15s, 25s, ...
//! up to 300s. A successful pass clears the count for that resource.

use crate::config::ControllerConfig;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Consecutive failure counts keyed by `namespace/name`.
#[derive(Debug)]
pub struct ErrorBackoff {
    min: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, u32>>,
}

impl ErrorBackoff {
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn from_config(config: &ControllerConfig) -> Self {
        Self::new(
            Duration::from_secs(config.error_backoff_min_secs),
            Duration::from_secs(config.error_backoff_max_secs),
        )
    }

    /// Counts one more failure for `key` and returns the delay before the
    /// next attempt along with the failure count.
    pub fn record_failure(&self, key: &str) -> (Duration, u32) {
        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(key.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        (self.delay_after(*count), *count)
    }

    /// Drops the failure count of `key`. Used after a successful pass and
    /// once the resource is gone.
    pub fn clear(&self, key: &str) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn delay_after(&self, failures: u32) -> Duration {
        let (mut prev, mut current) = (Duration::ZERO, self.min);
        for _ in 1..failures {
            if current >= self.max {
                break;
            }
            (prev, current) = (current, prev.saturating_add(current));
        }
        current.min(self.max)
    }
}
