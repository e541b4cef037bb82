//! Reconnect budget
//!
//! Counts consecutive failed connection attempts. Any successful connection
//! resets the count; once it exceeds `max_retry` the adapter gives up.

use std::time::Duration;

/// Delay between reconnect attempts
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Reconnect attempts allowed after a failure before giving up
pub const DEFAULT_MAX_RETRY: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait before each reconnect attempt
    pub delay: Duration,
    /// Consecutive failures tolerated before the adapter becomes terminal
    pub max_retry: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RETRY_DELAY,
            max_retry: DEFAULT_MAX_RETRY,
        }
    }
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { attempt: u32, delay: Duration },
    GiveUp { failures: u32 },
}

#[derive(Debug, Clone)]
pub struct RetryState {
    policy: RetryPolicy,
    failures: u32,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, failures: 0 }
    }

    /// Record a failed connection (or a lost one) and decide what comes next
    pub fn record_failure(&mut self) -> RetryDecision {
        self.failures = self.failures.saturating_add(1);
        if self.failures > self.policy.max_retry {
            RetryDecision::GiveUp {
                failures: self.failures,
            }
        } else {
            RetryDecision::Retry {
                attempt: self.failures,
                delay: self.policy.delay,
            }
        }
    }

    /// Called on every successful connection
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
