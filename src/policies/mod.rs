//! Retry, concurrency and composition policies.
//!
//! This module groups the knobs that control **how often** an operation is
//! invoked, **how long** to wait between invocations, and **how many**
//! invocations may run at once.
//!
//! ## Contents
//! - [`RetryPolicy`]       attempts and exponential backoff parameters
//! - [`backoff_delay`]     pure delay calculation for one attempt
//! - [`ConcurrencyPolicy`] simultaneous in-flight limit (+ optional queue bound)
//! - [`ErrorClass`]        caller-supplied retryable / fatal classification
//! - [`Composition`]       nesting of admission and retry when both are bound
//!
//! ## Quick wiring
//! ```text
//! OperationBinding { retry: Option<RetryPolicy>, concurrency: Option<ConcurrencyPolicy>,
//!                    composition, classifier }
//!      └─► core::engine::Engine uses:
//!           - concurrency to gate the call in the AdmissionController
//!           - retry + classifier to drive the RetryExecutor
//!           - composition to decide where the gate sits
//! ```
//!
//! ## Defaults
//! - `RetryPolicy::default()` → 3 attempts, 1s fixed delay.
//! - `ErrorClass::Retryable` for every failure unless a classifier says otherwise.
//! - `Composition::AdmitOnce`.

mod backoff;
mod classify;
mod composition;
mod concurrency;
mod retry;

pub use backoff::backoff_delay;
pub use classify::{Classifier, ErrorClass, retry_all};
pub use composition::Composition;
pub use concurrency::ConcurrencyPolicy;
pub use retry::RetryPolicy;
