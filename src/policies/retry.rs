//! # Retry policy.
//!
//! [`RetryPolicy`] is an immutable value object describing how many times an
//! operation may be invoked and how the delay between invocations grows.
//! It is parameterized by:
//! - [`RetryPolicy::max_attempts`] total invocations, including the first;
//! - [`RetryPolicy::initial_delay`] delay before the 2nd attempt;
//! - [`RetryPolicy::multiplier`] geometric growth factor per failed attempt;
//! - [`RetryPolicy::max_delay`] upper clamp on any computed delay.
//!
//! Construction validates all parameters and fails fast with [`InvalidPolicy`];
//! a policy that exists is always usable.

use std::time::Duration;

use crate::{error::InvalidPolicy, policies::backoff::backoff_delay};

/// Bounded retry with exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Returns a policy with:
    /// - `max_attempts = 3`;
    /// - `initial_delay = 1s`;
    /// - `multiplier = 1.0` (fixed delay);
    /// - `max_delay = 1s`.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            multiplier: 1.0,
            max_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a validated policy.
    ///
    /// ### Errors
    /// - [`InvalidPolicy::MaxAttempts`] if `max_attempts < 1`;
    /// - [`InvalidPolicy::Multiplier`] if `multiplier < 1.0` or not finite;
    /// - [`InvalidPolicy::MaxDelay`] if `max_delay < initial_delay`.
    pub fn new(
        max_attempts: u32,
        initial_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
    ) -> Result<Self, InvalidPolicy> {
        if max_attempts < 1 {
            return Err(InvalidPolicy::MaxAttempts { got: max_attempts });
        }
        if !multiplier.is_finite() || multiplier < 1.0 {
            return Err(InvalidPolicy::Multiplier { got: multiplier });
        }
        if max_delay < initial_delay {
            return Err(InvalidPolicy::MaxDelay {
                initial_delay,
                max_delay,
            });
        }
        Ok(Self {
            max_attempts,
            initial_delay,
            multiplier,
            max_delay,
        })
    }

    /// Fixed delay between attempts (`multiplier = 1.0`, `max_delay = delay`).
    pub fn fixed(max_attempts: u32, delay: Duration) -> Result<Self, InvalidPolicy> {
        Self::new(max_attempts, delay, 1.0, delay)
    }

    /// Single invocation, no delay. Used for bindings without a retry policy.
    pub(crate) const fn once() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Total invocation attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before the 2nd attempt.
    pub fn initial_delay(&self) -> Duration {
        self.initial_delay
    }

    /// Growth factor applied after each failed attempt.
    pub fn multiplier(&self) -> f64 {
        self.multiplier
    }

    /// Upper clamp on any computed delay.
    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    /// Delay applied before `attempt` (1-based). See [`backoff_delay`].
    #[inline]
    pub fn delay(&self, attempt: u32) -> Duration {
        backoff_delay(attempt, self)
    }

    /// Sum of all delays a call waits out if every attempt fails retryably.
    pub fn total_delay(&self) -> Duration {
        (2..=self.max_attempts).map(|a| self.delay(a)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero_attempts() {
        let err = RetryPolicy::new(0, Duration::ZERO, 1.0, Duration::ZERO).unwrap_err();
        assert_eq!(err, InvalidPolicy::MaxAttempts { got: 0 });
        assert_eq!(err.as_label(), "policy_max_attempts");
    }

    #[test]
    fn test_rejects_shrinking_multiplier() {
        let err =
            RetryPolicy::new(3, Duration::from_millis(10), 0.5, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, InvalidPolicy::Multiplier { .. }));

        let err = RetryPolicy::new(3, Duration::from_millis(10), f64::NAN, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, InvalidPolicy::Multiplier { .. }));

        let err = RetryPolicy::new(
            3,
            Duration::from_millis(10),
            f64::INFINITY,
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, InvalidPolicy::Multiplier { .. }));
    }

    #[test]
    fn test_rejects_cap_below_initial() {
        let err = RetryPolicy::new(3, Duration::from_secs(2), 2.0, Duration::from_secs(1)).unwrap_err();
        assert_eq!(
            err,
            InvalidPolicy::MaxDelay {
                initial_delay: Duration::from_secs(2),
                max_delay: Duration::from_secs(1),
            }
        );
    }

    #[test]
    fn test_fixed_policy() {
        let p = RetryPolicy::fixed(3, Duration::from_secs(1)).unwrap();
        assert_eq!(p.delay(1), Duration::ZERO);
        assert_eq!(p.delay(2), Duration::from_secs(1));
        assert_eq!(p.delay(3), Duration::from_secs(1));
        assert_eq!(p.total_delay(), Duration::from_secs(2));
        assert_eq!(p, RetryPolicy::default());
    }

    #[test]
    fn test_total_delay_exponential() {
        let p = RetryPolicy::new(4, Duration::from_millis(500), 2.0, Duration::from_secs(5)).unwrap();
        assert_eq!(p.total_delay(), Duration::from_millis(3500));
    }

    #[test]
    fn test_single_attempt_never_waits() {
        let p = RetryPolicy::new(1, Duration::from_secs(9), 2.0, Duration::from_secs(9)).unwrap();
        assert_eq!(p.total_delay(), Duration::ZERO);
    }
}
