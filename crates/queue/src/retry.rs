//! Reconnect delay policy.

use std::time::Duration;

/// How long the supervisor waits between connection attempts.
///
/// Retries never give up; only the delay is configurable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Same delay after every failure.
    Fixed(Duration),
    /// Doubles after each consecutive failure, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

impl RetryPolicy {
    /// Delay to wait after the given consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        match *self {
            RetryPolicy::Fixed(delay) => delay,
            RetryPolicy::Exponential { initial, max } => {
                let shift = failures.saturating_sub(1).min(16);
                initial.saturating_mul(1 << shift).min(max)
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::Fixed(Duration::from_secs(5))
    }
}
