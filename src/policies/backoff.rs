//! # Backoff calculator.
//!
//! [`backoff_delay`] computes the delay inserted before a given attempt of a
//! [`RetryPolicy`]. It is a pure function of the attempt number:
//!
//! - attempt `1` (the first try) waits nothing;
//! - attempt `k > 1` waits `initial_delay × multiplier^(k-2)`, clamped to `max_delay`.
//!
//! No jitter is applied, so the delay sequence of a policy is fully determined and
//! non-decreasing (construction guarantees `multiplier >= 1.0` and
//! `max_delay >= initial_delay`).
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use opvisor::{RetryPolicy, backoff_delay};
//!
//! let policy = RetryPolicy::new(
//!     4,
//!     Duration::from_millis(500),
//!     2.0,
//!     Duration::from_secs(5),
//! ).unwrap();
//!
//! assert_eq!(backoff_delay(1, &policy), Duration::ZERO);
//! assert_eq!(backoff_delay(2, &policy), Duration::from_millis(500));
//! assert_eq!(backoff_delay(3, &policy), Duration::from_millis(1000));
//! assert_eq!(backoff_delay(4, &policy), Duration::from_millis(2000));
//! // 500ms × 2^8 = 128s → capped at max=5s
//! assert_eq!(backoff_delay(10, &policy), Duration::from_secs(5));
//! ```

use std::time::Duration;

use crate::policies::retry::RetryPolicy;

/// Computes the delay applied before `attempt` (1-based).
///
/// The exponent is derived from the attempt number alone, so a delay never feeds
/// back into the next one. Overflowing or non-finite intermediate values clamp to
/// `max_delay`.
pub fn backoff_delay(attempt: u32, policy: &RetryPolicy) -> Duration {
    if attempt <= 1 {
        return Duration::ZERO;
    }

    let max = policy.max_delay();
    let exp = (attempt - 2).min(i32::MAX as u32) as i32;
    let unclamped_nanos = policy.initial_delay().as_nanos() as f64 * policy.multiplier().powi(exp);

    if !unclamped_nanos.is_finite()
        || unclamped_nanos < 0.0
        || unclamped_nanos >= max.as_nanos() as f64
    {
        return max;
    }
    Duration::from_nanos(unclamped_nanos.round() as u64).min(max)
}
