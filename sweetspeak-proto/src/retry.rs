//! Bounded exponential backoff shared by the read pump and client reconnects.

use std::time::Duration;

/// How many times to retry an operation and how long to wait between tries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts allowed before giving up (at least one).
    pub max_attempts: u32,
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor applied per further failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that waits the same `delay` between each of `max_attempts` tries.
    #[must_use]
    pub const fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
        }
    }

    /// Delay to wait after the `failures`-th consecutive failure (1-based).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn delay_for(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let nanos = self.initial_delay.as_nanos() as f64 * self.multiplier.max(1.0).powi(exponent);
        if nanos.is_finite() && nanos < self.max_delay.as_nanos() as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            self.max_delay
        }
    }

    /// Whether another attempt is allowed after `failures` failures.
    #[must_use]
    pub const fn allows_retry(&self, failures: u32) -> bool {
        failures < self.max_attempts
    }
}
