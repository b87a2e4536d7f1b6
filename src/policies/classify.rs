//! # Failure classification.
//!
//! The engine does not know what an operation does, so it cannot tell whether a
//! failure is worth retrying. The caller decides by attaching a classifier
//! (`Fn(&E) -> ErrorClass`) to the operation binding.
//!
//! - [`ErrorClass::Retryable`] the retry loop continues while attempts remain.
//! - [`ErrorClass::Fatal`] the loop stops immediately, whatever budget is left.

use std::sync::Arc;

/// Caller-supplied classification of an operation failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying may help (timeouts, dropped connections, ...). Default.
    #[default]
    Retryable,
    /// Retrying cannot help (bad input, permission denied, ...).
    Fatal,
}

impl ErrorClass {
    /// True for [`ErrorClass::Retryable`].
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable)
    }
}

/// Shared classifier handle stored in a binding.
pub type Classifier<E> = Arc<dyn Fn(&E) -> ErrorClass + Send + Sync>;

/// Classifier that treats every failure as retryable.
pub fn retry_all<E>() -> Classifier<E> {
    Arc::new(|_| ErrorClass::Retryable)
}
