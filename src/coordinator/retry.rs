//! Bounded retry with exponential backoff

use std::thread;
use std::time::Duration;

use crate::error::{Result, TallyError};

/// How transient write failures are retried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first (at least 1)
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub initial_backoff: Duration,
    /// Upper bound for the doubling delay
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out
    ///
    /// Every failure that reaches the caller is wrapped in `WriteFailed`
    /// with the number of attempts made.
    pub fn run<T>(&self, operation: &str, mut op: impl FnMut() -> Result<T>) -> Result<T> {
        let max_attempts = self.max_attempts.max(1);
        let mut backoff = self.initial_backoff;
        let mut attempt = 1;

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    tracing::warn!(
                        operation,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Transient write error, retrying"
                    );
                    thread::sleep(backoff);
                    backoff = (backoff * 2).min(self.max_backoff);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(operation, attempts = attempt, error = %e, "Write failed");
                    return Err(TallyError::WriteFailed {
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
            }
        }
    }
}
