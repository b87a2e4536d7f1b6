//! # Concurrency policy.
//!
//! [`ConcurrencyPolicy`] bounds how many executions of one operation may be
//! in flight at once. Excess callers queue in arrival order.
//!
//! The queue is unbounded by default. [`ConcurrencyPolicy::with_queue_limit`]
//! caps the number of waiting callers; once the cap is reached new callers are
//! rejected instead of queued.

use tokio::sync::Semaphore;

use crate::error::InvalidPolicy;

/// Bounded-concurrency admission policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConcurrencyPolicy {
    max_concurrent: usize,
    queue_limit: Option<usize>,
}

impl ConcurrencyPolicy {
    /// Creates a validated policy with an unbounded wait queue.
    ///
    /// ### Errors
    /// [`InvalidPolicy::MaxConcurrent`] if `max_concurrent` is `0` or larger than
    /// the semaphore can represent.
    pub fn new(max_concurrent: usize) -> Result<Self, InvalidPolicy> {
        if max_concurrent == 0 || max_concurrent > Semaphore::MAX_PERMITS {
            return Err(InvalidPolicy::MaxConcurrent {
                got: max_concurrent,
                max: Semaphore::MAX_PERMITS,
            });
        }
        Ok(Self {
            max_concurrent,
            queue_limit: None,
        })
    }

    /// Returns a policy that rejects callers once `limit` of them are waiting.
    ///
    /// `limit = 0` means "never wait": a caller is either admitted immediately or rejected.
    pub fn with_queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = Some(limit);
        self
    }

    /// Maximum simultaneous in-flight executions.
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Maximum number of waiting callers (`None` = unbounded).
    pub fn queue_limit(&self) -> Option<usize> {
        self.queue_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_zero() {
        let err = ConcurrencyPolicy::new(0).unwrap_err();
        assert!(matches!(err, InvalidPolicy::MaxConcurrent { got: 0, .. }));
    }

    #[test]
    fn test_rejects_above_semaphore_capacity() {
        assert!(ConcurrencyPolicy::new(Semaphore::MAX_PERMITS + 1).is_err());
        assert!(ConcurrencyPolicy::new(Semaphore::MAX_PERMITS).is_ok());
    }

    #[test]
    fn test_queue_limit_defaults_to_unbounded() {
        let p = ConcurrencyPolicy::new(2).unwrap();
        assert_eq!(p.max_concurrent(), 2);
        assert_eq!(p.queue_limit(), None);
        assert_eq!(p.with_queue_limit(8).queue_limit(), Some(8));
    }
}
