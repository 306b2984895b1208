//! Retry policy with exponential backoff and jitter.
//!
//! Retries transient failures (timeouts, tool errors marked retryable) with
//! configurable exponential backoff. Permission denials, validation errors,
//! and cancellations are never retried — retrying them would just repeat
//! the same answer slower.

use crate::error::{ErrorKind, ToolError};
use std::collections::HashSet;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of `execute` attempts (1 = no retries).
    pub max_attempts: u32,
    /// Initial delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (typically 2.0).
    pub multiplier: f64,
    /// Whether to add jitter to prevent thundering herd.
    pub jitter: bool,
    /// Error kinds eligible for retry. An [`ExecutionError`] additionally
    /// needs its own `retryable` flag set.
    ///
    /// [`ExecutionError`]: ErrorKind::ExecutionError
    pub retryable_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
            jitter: true,
            retryable_kinds: HashSet::from([ErrorKind::Timeout, ErrorKind::ExecutionError]),
        }
    }
}

impl RetryPolicy {
    /// A policy with the given attempt budget and default backoff.
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Set the initial delay (builder pattern).
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Whether another attempt is allowed after `error` on `attempt`
    /// (1-indexed).
    pub fn should_retry(&self, error: &ToolError, attempt: u32) -> bool {
        attempt < self.max_attempts
            && error.retryable
            && self.retryable_kinds.contains(&error.kind)
    }

    /// Calculate the delay before the retry following attempt `attempt`
    /// (0-indexed backoff step).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_delay.as_secs_f64());

        if self.jitter {
            // Deterministic jitter keyed on the attempt number: spreads
            // callers without pulling in a random number generator.
            let jitter_factor = match attempt % 4 {
                0 => 0.75,
                1 => 0.90,
                2 => 0.60,
                3 => 0.85,
                _ => 0.80,
            };
            Duration::from_secs_f64(capped * jitter_factor)
        } else {
            Duration::from_secs_f64(capped)
        }
    }
}
