//! # Operation binding.
//!
//! Defines [`OperationBinding`], the association between an operation key, its
//! optional policies and the callable itself. A binding is created once, handed to
//! [`EngineBuilder::register`](crate::EngineBuilder::register), and never changes
//! afterwards.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use opvisor::{ConcurrencyPolicy, ErrorClass, OpFn, OperationBinding, RetryPolicy};
//!
//! let binding = OperationBinding::new(
//!     "critical",
//!     OpFn::arc(|id: String, _ctx: CancellationToken| async move {
//!         Ok::<_, String>(format!("critical operation '{id}' executed"))
//!     }),
//! )
//! .with_retry(RetryPolicy::fixed(2, Duration::from_secs(1)).unwrap())
//! .with_concurrency(ConcurrencyPolicy::new(1).unwrap())
//! .with_classifier(|e: &String| {
//!     if e.starts_with("bad input") { ErrorClass::Fatal } else { ErrorClass::Retryable }
//! });
//!
//! assert_eq!(binding.key(), "critical");
//! assert!(binding.retry().is_some());
//! ```

use std::sync::Arc;

use crate::operations::OpRef;
use crate::policies::{Classifier, Composition, ConcurrencyPolicy, ErrorClass, RetryPolicy, retry_all};

/// Operation key, policies and callable.
pub struct OperationBinding<I, V, E> {
    key: Arc<str>,
    op: OpRef<I, V, E>,
    retry: Option<RetryPolicy>,
    concurrency: Option<ConcurrencyPolicy>,
    composition: Composition,
    classifier: Classifier<E>,
}

impl<I, V, E> Clone for OperationBinding<I, V, E> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            op: Arc::clone(&self.op),
            retry: self.retry,
            concurrency: self.concurrency,
            composition: self.composition,
            classifier: Arc::clone(&self.classifier),
        }
    }
}

impl<I, V, E> std::fmt::Debug for OperationBinding<I, V, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationBinding")
            .field("key", &self.key)
            .field("retry", &self.retry)
            .field("concurrency", &self.concurrency)
            .field("composition", &self.composition)
            .finish_non_exhaustive()
    }
}

impl<I, V, E> OperationBinding<I, V, E>
where
    E: 'static,
{
    /// Creates a passthrough binding: no retry, no concurrency limit,
    /// every failure classified retryable.
    pub fn new(key: impl Into<Arc<str>>, op: OpRef<I, V, E>) -> Self {
        Self {
            key: key.into(),
            op,
            retry: None,
            concurrency: None,
            composition: Composition::default(),
            classifier: retry_all(),
        }
    }

    /// Returns a binding with a retry policy attached.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Returns a binding with a concurrency policy attached.
    pub fn with_concurrency(mut self, concurrency: ConcurrencyPolicy) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Returns a binding with the given composition mode.
    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = composition;
        self
    }

    /// Returns a binding with a failure classifier.
    pub fn with_classifier<C>(mut self, classify: C) -> Self
    where
        C: Fn(&E) -> ErrorClass + Send + Sync + 'static,
    {
        self.classifier = Arc::new(classify);
        self
    }
}

impl<I, V, E> OperationBinding<I, V, E> {
    /// Operation key.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn key_arc(&self) -> &Arc<str> {
        &self.key
    }

    /// The bound callable.
    pub fn operation(&self) -> &OpRef<I, V, E> {
        &self.op
    }

    /// Retry policy, if bound.
    pub fn retry(&self) -> Option<&RetryPolicy> {
        self.retry.as_ref()
    }

    /// Concurrency policy, if bound.
    pub fn concurrency(&self) -> Option<&ConcurrencyPolicy> {
        self.concurrency.as_ref()
    }

    /// Composition mode.
    pub fn composition(&self) -> Composition {
        self.composition
    }

    /// Failure classifier.
    pub fn classifier(&self) -> &Classifier<E> {
        &self.classifier
    }
}
