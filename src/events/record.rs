//! # Per-attempt observation record.
//!
//! An [`AttemptRecord`] is built by the retry executor for every invocation of an
//! operation and published on the bus as an [`Event`](crate::Event). It lives only
//! for the duration of one execution call and is never persisted.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::policies::ErrorClass;

/// Outcome of a single attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The operation returned `Ok`.
    Success,
    /// The operation failed and the classifier allows a retry.
    RetryableFailure,
    /// The operation failed and the classifier forbids a retry.
    FatalFailure,
}

impl AttemptOutcome {
    /// Maps a classified failure to an outcome.
    #[inline]
    pub fn from_class(class: ErrorClass) -> Self {
        match class {
            ErrorClass::Retryable => AttemptOutcome::RetryableFailure,
            ErrorClass::Fatal => AttemptOutcome::FatalFailure,
        }
    }

    /// Short stable label for logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            AttemptOutcome::Success => "success",
            AttemptOutcome::RetryableFailure => "retryable_failure",
            AttemptOutcome::FatalFailure => "fatal_failure",
        }
    }
}

/// One attempt of one execution call.
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    /// Operation key.
    pub operation: Arc<str>,
    /// Attempt number (1-based).
    pub attempt: u32,
    /// Wall-clock time at which the attempt started.
    pub at: SystemTime,
    /// How the attempt ended.
    pub outcome: AttemptOutcome,
    /// Delay waited out before this attempt (`0` for the first).
    pub delay: Duration,
    /// Failure message, for failed attempts.
    pub reason: Option<Arc<str>>,
}
