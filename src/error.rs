//! Error types used by the opvisor engine.
//!
//! This module defines the error enums surfaced by the engine:
//!
//! - [`InvalidPolicy`]: malformed policy parameters, rejected at construction time.
//! - [`RegisterError`]: failures while binding operations to the engine.
//! - [`AdmissionError`]: failures to obtain a concurrency slot.
//! - [`ExecuteError`]: every outcome of [`Engine::execute`](crate::Engine::execute) that is not a success.
//! - [`ConfigError`]: failures while loading an [`EngineConfig`](crate::EngineConfig).
//!
//! All types provide `as_label` (stable snake_case label for logs/metrics).
//! Failures of a call are always returned to the caller, never only logged.

use std::time::Duration;

use thiserror::Error;

/// # Malformed policy parameters.
///
/// Returned by [`RetryPolicy::new`](crate::RetryPolicy::new) and
/// [`ConcurrencyPolicy::new`](crate::ConcurrencyPolicy::new). Never retried.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidPolicy {
    /// `max_attempts` must count at least the first invocation.
    #[error("invalid policy: max_attempts must be >= 1 (got {got})")]
    MaxAttempts {
        /// The rejected value.
        got: u32,
    },

    /// Backoff must never shrink between attempts.
    #[error("invalid policy: multiplier must be a finite value >= 1.0 (got {got})")]
    Multiplier {
        /// The rejected value.
        got: f64,
    },

    /// The delay cap must not be below the first delay.
    #[error("invalid policy: max_delay {max_delay:?} is below initial_delay {initial_delay:?}")]
    MaxDelay {
        /// Configured initial delay.
        initial_delay: Duration,
        /// Configured (rejected) cap.
        max_delay: Duration,
    },

    /// Concurrency limits must admit at least one caller and fit a semaphore.
    #[error("invalid policy: max_concurrent must be in 1..={max} (got {got})")]
    MaxConcurrent {
        /// The rejected value.
        got: usize,
        /// Largest supported limit.
        max: usize,
    },
}

impl InvalidPolicy {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InvalidPolicy::MaxAttempts { .. } => "policy_max_attempts",
            InvalidPolicy::Multiplier { .. } => "policy_multiplier",
            InvalidPolicy::MaxDelay { .. } => "policy_max_delay",
            InvalidPolicy::MaxConcurrent { .. } => "policy_max_concurrent",
        }
    }
}

/// # Errors produced while registering operations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegisterError {
    /// The key is already bound; bindings are immutable once registered.
    #[error("operation '{key}' is already registered")]
    Duplicate {
        /// The offending key.
        key: String,
    },

    /// A policy attached to the binding is malformed.
    #[error("operation '{key}': {source}")]
    InvalidPolicy {
        /// Operation key the policy was meant for.
        key: String,
        /// Underlying validation failure.
        source: InvalidPolicy,
    },
}

impl RegisterError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegisterError::Duplicate { .. } => "register_duplicate",
            RegisterError::InvalidPolicy { .. } => "register_invalid_policy",
        }
    }
}

/// # Errors produced by an execution call.
///
/// `E` is the wrapped operation's own error type. Variants that carry an `E`
/// hand the operation's final error back untouched so callers can map it to
/// their own external representation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExecuteError<E> {
    /// No operation is bound under this key.
    #[error("unknown operation '{key}'")]
    UnknownOperation {
        /// The requested key.
        key: String,
    },

    /// The operation failed and no retry policy is bound (single invocation).
    #[error("operation failed: {error}")]
    Failed {
        /// The operation's error.
        error: E,
    },

    /// The classifier marked the failure fatal; remaining attempts were not used.
    #[error("fatal error on attempt {attempt} (no retry): {error}")]
    Fatal {
        /// The operation's error.
        error: E,
        /// Attempt on which the failure happened (1-based).
        attempt: u32,
    },

    /// Every attempt failed retryably.
    #[error("exhausted after {attempts} attempts: {error}")]
    Exhausted {
        /// The last attempt's error.
        error: E,
        /// Number of attempts made (equals `max_attempts`).
        attempts: u32,
    },

    /// The deadline elapsed while waiting for a concurrency slot.
    #[error("admission timed out after {waited:?}")]
    AdmissionTimeout {
        /// Time spent waiting.
        waited: Duration,
    },

    /// The caller was cancelled while waiting for a concurrency slot.
    #[error("admission cancelled")]
    AdmissionCancelled,

    /// The admission queue is bounded and already full.
    ///
    /// With per-attempt admission this can happen after some attempts already ran;
    /// `attempts` and `last_error` then describe them.
    #[error("admission rejected: {waiting} callers already queued (limit {limit})")]
    AdmissionRejected {
        /// Callers queued at the time of rejection.
        waiting: usize,
        /// Configured queue bound.
        limit: usize,
        /// Attempts made before the rejection.
        attempts: u32,
        /// Error of the last attempt, if any attempt ran.
        last_error: Option<E>,
    },

    /// The deadline elapsed between attempts (during backoff or re-admission).
    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded {
        /// Attempts made before the deadline.
        attempts: u32,
        /// Error of the last attempt, if any attempt ran.
        last_error: Option<E>,
    },

    /// The caller was cancelled between attempts (during backoff or re-admission).
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts made before cancellation.
        attempts: u32,
        /// Error of the last attempt, if any attempt ran.
        last_error: Option<E>,
    },
}

impl<E> ExecuteError<E> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use opvisor::ExecuteError;
    ///
    /// let err: ExecuteError<String> = ExecuteError::Exhausted { error: "boom".into(), attempts: 3 };
    /// assert_eq!(err.as_label(), "execute_exhausted");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecuteError::UnknownOperation { .. } => "execute_unknown_operation",
            ExecuteError::Failed { .. } => "execute_failed",
            ExecuteError::Fatal { .. } => "execute_fatal",
            ExecuteError::Exhausted { .. } => "execute_exhausted",
            ExecuteError::AdmissionTimeout { .. } => "admission_timeout",
            ExecuteError::AdmissionCancelled => "admission_cancelled",
            ExecuteError::AdmissionRejected { .. } => "admission_rejected",
            ExecuteError::DeadlineExceeded { .. } => "execute_deadline_exceeded",
            ExecuteError::Cancelled { .. } => "execute_cancelled",
        }
    }

    /// Number of attempts the call made before failing (`0` if the operation never ran).
    pub fn attempts(&self) -> u32 {
        match self {
            ExecuteError::Failed { .. } => 1,
            ExecuteError::Fatal { attempt, .. } => *attempt,
            ExecuteError::Exhausted { attempts, .. }
            | ExecuteError::DeadlineExceeded { attempts, .. }
            | ExecuteError::Cancelled { attempts, .. }
            | ExecuteError::AdmissionRejected { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Returns the wrapped operation's error, if this failure carries one.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            ExecuteError::Failed { error }
            | ExecuteError::Fatal { error, .. }
            | ExecuteError::Exhausted { error, .. } => Some(error),
            ExecuteError::DeadlineExceeded { last_error, .. }
            | ExecuteError::Cancelled { last_error, .. }
            | ExecuteError::AdmissionRejected { last_error, .. } => last_error,
            _ => None,
        }
    }

    /// Borrowing variant of [`ExecuteError::into_operation_error`].
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            ExecuteError::Failed { error }
            | ExecuteError::Fatal { error, .. }
            | ExecuteError::Exhausted { error, .. } => Some(error),
            ExecuteError::DeadlineExceeded { last_error, .. }
            | ExecuteError::Cancelled { last_error, .. }
            | ExecuteError::AdmissionRejected { last_error, .. } => last_error.as_ref(),
            _ => None,
        }
    }

    /// True for failures raised while waiting for a concurrency slot.
    pub fn is_admission(&self) -> bool {
        matches!(
            self,
            ExecuteError::AdmissionTimeout { .. }
                | ExecuteError::AdmissionCancelled
                | ExecuteError::AdmissionRejected { .. }
        )
    }
}

/// # Errors produced by the admission controller.
///
/// Converted into the matching [`ExecuteError`] variant by the engine.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// No concurrency gate exists for this key.
    #[error("no concurrency gate for '{key}'")]
    UnknownOperation {
        /// The requested key.
        key: String,
    },

    /// The deadline elapsed while waiting.
    #[error("admission timed out after {waited:?}")]
    Timeout {
        /// Time spent waiting.
        waited: Duration,
    },

    /// The caller was cancelled while waiting.
    #[error("admission cancelled")]
    Cancelled,

    /// The wait queue is full.
    #[error("admission rejected: {waiting} callers already queued (limit {limit})")]
    Rejected {
        /// Callers queued at the time of rejection.
        waiting: usize,
        /// Configured queue bound.
        limit: usize,
    },
}

impl AdmissionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AdmissionError::UnknownOperation { .. } => "admission_unknown_operation",
            AdmissionError::Timeout { .. } => "admission_timeout",
            AdmissionError::Cancelled => "admission_cancelled",
            AdmissionError::Rejected { .. } => "admission_rejected",
        }
    }
}

impl<E> From<AdmissionError> for ExecuteError<E> {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::UnknownOperation { key } => ExecuteError::UnknownOperation { key },
            AdmissionError::Timeout { waited } => ExecuteError::AdmissionTimeout { waited },
            AdmissionError::Cancelled => ExecuteError::AdmissionCancelled,
            AdmissionError::Rejected { waiting, limit } => ExecuteError::AdmissionRejected {
                waiting,
                limit,
                attempts: 0,
                last_error: None,
            },
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration is not valid TOML for [`EngineConfig`](crate::EngineConfig).
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A configured policy is malformed.
    #[error("operation '{key}': {source}")]
    InvalidPolicy {
        /// Operation key the policy belongs to.
        key: String,
        /// Underlying validation failure.
        source: InvalidPolicy,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Io(_) => "config_io",
            ConfigError::Parse(_) => "config_parse",
            ConfigError::InvalidPolicy { .. } => "config_invalid_policy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_error_is_handed_back() {
        let err: ExecuteError<&str> = ExecuteError::Exhausted {
            error: "db down",
            attempts: 4,
        };
        assert_eq!(err.attempts(), 4);
        assert_eq!(err.operation_error(), Some(&"db down"));
        assert_eq!(err.into_operation_error(), Some("db down"));
    }

    #[test]
    fn test_admission_errors_carry_no_operation_error() {
        let err: ExecuteError<&str> = ExecuteError::AdmissionCancelled;
        assert!(err.is_admission());
        assert_eq!(err.attempts(), 0);
        assert!(err.into_operation_error().is_none());
    }

    #[test]
    fn test_rejection_after_attempts_keeps_last_error() {
        let err: ExecuteError<&str> = ExecuteError::AdmissionRejected {
            waiting: 1,
            limit: 1,
            attempts: 2,
            last_error: Some("db down"),
        };
        assert!(err.is_admission());
        assert_eq!(err.attempts(), 2);
        assert_eq!(err.operation_error(), Some(&"db down"));
    }

    #[test]
    fn test_display_mentions_attempts() {
        let err: ExecuteError<String> = ExecuteError::Fatal {
            error: "bad input".into(),
            attempt: 2,
        };
        assert_eq!(
            err.to_string(),
            "fatal error on attempt 2 (no retry): bad input"
        );
    }
}
