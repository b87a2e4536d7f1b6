//! # Composition of retry and admission.
//!
//! When an operation is bound to both a retry policy and a concurrency policy,
//! [`Composition`] fixes how the two nest:
//!
//! ```text
//! AdmitOnce (default):
//!   admit ──► attempt 1 ──► backoff ──► attempt 2 ──► ... ──► release
//!
//! AdmitPerAttempt:
//!   admit ──► attempt 1 ──► release ──► backoff ──► admit ──► attempt 2 ──► release ...
//! ```
//!
//! `AdmitOnce` keeps one logical call from taking more than its share of capacity
//! while it retries. `AdmitPerAttempt` frees the slot during backoff so other
//! callers may run between the attempts of a failing one.
//!
//! With only one of the two policies bound, both modes behave identically.

use serde::Deserialize;

/// Nesting order between the admission gate and the retry loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// One slot held across all attempts and backoff delays.
    #[default]
    AdmitOnce,
    /// A slot acquired before each attempt and released right after it.
    AdmitPerAttempt,
}
