//! Bounded retry policy for transient broker failures
//!
//! The "reconnect, pause, retry" pattern around sends, expressed as an
//! explicit policy instead of an inline loop-with-counter: a fixed number
//! of attempts with a fixed inter-attempt delay, retrying only
//! connection-class errors.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Retry policy: how many attempts, how long between them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Fixed pause between attempts (milliseconds)
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 250,
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails with a non-retryable error, or
    /// exhausts the attempt budget.
    ///
    /// `op` receives the 1-based attempt number; attempts after the first
    /// are expected to re-establish whatever the failure tore down before
    /// they retry the operation itself.
    pub fn run<T>(&self, mut op: impl FnMut(u32) -> Result<T>) -> Result<T> {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    warn!(
                        attempt,
                        delay_ms = self.delay_ms,
                        error = %e,
                        "transient failure, retrying"
                    );
                    std::thread::sleep(Duration::from_millis(self.delay_ms));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{reason, Error};

    fn connection_lost() -> Error {
        Error::Connection {
            reason: reason::CONNECTION_LOST,
            detail: "test".to_string(),
        }
    }

    #[test]
    fn test_succeeds_first_attempt() {
        let policy = RetryPolicy::default();
        let result = policy.run(|attempt| {
            assert_eq!(attempt, 1);
            Ok(42)
        });
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_retries_transient_failures() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_ms: 1,
        };
        let mut calls = 0;
        let result = policy.run(|_| {
            calls += 1;
            if calls < 3 {
                Err(connection_lost())
            } else {
                Ok("done")
            }
        });
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_exhausts_attempt_budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_ms: 1,
        };
        let mut calls = 0;
        let result: Result<()> = policy.run(|_| {
            calls += 1;
            Err(connection_lost())
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_non_retryable_fails_immediately() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay_ms: 1,
        };
        let mut calls = 0;
        let result: Result<()> = policy.run(|_| {
            calls += 1;
            Err(Error::NoQueueOpen)
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
