//! # Retry executor.
//!
//! Drives repeated invocation of an operation until success, attempt exhaustion or
//! a fatal error, waiting out [`backoff_delay`](crate::backoff_delay) between attempts.
//!
//! ## Event flow
//! For each attempt the executor publishes:
//! ```text
//! AttemptStarting → [operation] → AttemptSucceeded (Ok)
//!                               → AttemptFatal     (Err, classified fatal)      → stop
//!                               → AttemptFailed    (Err, classified retryable)
//!
//! If attempts remain:
//!   → BackoffScheduled → [sleep] → (next attempt)
//! Otherwise:
//!   → RetryExhausted
//! ```
//!
//! ## Rules
//! - Attempts run **sequentially** within one call (never parallel).
//! - The first attempt runs without delay; attempt `k` waits `delay(k)` first.
//! - Success returns immediately; remaining attempts are not consumed.
//! - A fatal classification stops the loop whatever budget is left.
//! - Cancellation and deadline are observed before the first attempt, during
//!   backoff and while re-admitting; an attempt is never aborted by the executor.
//! - Publishing events never changes control flow.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::time;

use crate::{
    core::{
        admission::Gate,
        call::{CallContext, CallOptions, Interrupt},
    },
    error::{AdmissionError, ExecuteError},
    events::{AttemptOutcome, AttemptRecord, Bus, Event, EventKind},
    policies::{ErrorClass, RetryPolicy},
};

/// Stateless retry loop parameterized by a [`RetryPolicy`].
///
/// ## Example
/// ```rust
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::time::Duration;
/// use opvisor::{CallOptions, ErrorClass, ExecuteError, RetryExecutor, RetryPolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let policy = RetryPolicy::fixed(3, Duration::from_millis(1)).unwrap();
/// let calls = AtomicU32::new(0);
///
/// let res: Result<u32, ExecuteError<String>> = RetryExecutor::new(&policy)
///     .run(
///         |attempt| {
///             calls.fetch_add(1, Ordering::Relaxed);
///             async move { if attempt < 3 { Err("flaky".to_string()) } else { Ok(attempt) } }
///         },
///         |_e: &String| ErrorClass::Retryable,
///         &CallOptions::new(),
///     )
///     .await;
///
/// assert_eq!(res.unwrap(), 3);
/// assert_eq!(calls.load(Ordering::Relaxed), 3);
/// # }
/// ```
pub struct RetryExecutor<'a> {
    policy: &'a RetryPolicy,
    operation: Arc<str>,
    bus: Option<&'a Bus>,
    gate: Option<&'a Arc<Gate>>,
}

impl<'a> RetryExecutor<'a> {
    /// Creates an executor for `policy`, without observability.
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            operation: Arc::from("anonymous"),
            bus: None,
            gate: None,
        }
    }

    /// Names the operation in published events.
    pub fn for_operation(mut self, key: impl Into<Arc<str>>) -> Self {
        self.operation = key.into();
        self
    }

    /// Publishes one [`AttemptRecord`] per attempt (plus loop events) on `bus`.
    pub fn with_bus(mut self, bus: &'a Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Acquires a slot of `gate` around each attempt (admit-per-attempt composition).
    pub(crate) fn with_gate(mut self, gate: &'a Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Runs `op` until success, exhaustion or a fatal error.
    ///
    /// `op` receives the 1-based attempt number and returns a fresh future per attempt.
    /// `classify` decides whether a failure may be retried.
    ///
    /// ### Errors
    /// - [`ExecuteError::Fatal`] the classifier marked a failure fatal;
    /// - [`ExecuteError::Exhausted`] every attempt failed retryably;
    /// - [`ExecuteError::Cancelled`] / [`ExecuteError::DeadlineExceeded`] the call was
    ///   interrupted before the first attempt or during backoff.
    pub async fn run<V, E, F, Fut, C>(
        &self,
        op: F,
        classify: C,
        opts: &CallOptions,
    ) -> Result<V, ExecuteError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        self.run_in(op, classify, &CallContext::from(opts)).await
    }

    pub(crate) async fn run_in<V, E, F, Fut, C>(
        &self,
        mut op: F,
        classify: C,
        ctx: &CallContext,
    ) -> Result<V, ExecuteError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<V, E>>,
        C: Fn(&E) -> ErrorClass,
        E: Display,
    {
        let max_attempts = self.policy.max_attempts();
        let mut last_error: Option<E> = None;
        let mut attempt: u32 = 1;

        loop {
            let delay = self.policy.delay(attempt);
            let ready = if attempt == 1 {
                ctx.check()
            } else {
                ctx.guard(time::sleep(delay)).await
            };
            if let Err(int) = ready {
                return Err(self.interrupted(int, attempt - 1, last_error));
            }

            let slot = match self.gate {
                Some(gate) => match gate.admit(ctx).await {
                    Ok(slot) => Some(slot),
                    Err(err) if attempt == 1 => return Err(err.into()),
                    Err(err) => {
                        return Err(self.readmission_failed(err, attempt - 1, last_error));
                    }
                },
                None => None,
            };

            self.publish(
                Event::new(EventKind::AttemptStarting)
                    .with_operation(Arc::clone(&self.operation))
                    .with_attempt(attempt)
                    .with_delay(delay),
            );
            let at = SystemTime::now();
            let res = op(attempt).await;
            drop(slot);

            let error = match res {
                Ok(value) => {
                    self.record(attempt, at, AttemptOutcome::Success, delay, None);
                    return Ok(value);
                }
                Err(e) => e,
            };

            let class = classify(&error);
            let reason: Arc<str> = Arc::from(error.to_string());
            self.record(
                attempt,
                at,
                AttemptOutcome::from_class(class),
                delay,
                Some(Arc::clone(&reason)),
            );

            if class == ErrorClass::Fatal {
                return Err(ExecuteError::Fatal { error, attempt });
            }
            if attempt >= max_attempts {
                self.publish(
                    Event::new(EventKind::RetryExhausted)
                        .with_operation(Arc::clone(&self.operation))
                        .with_attempt(attempt)
                        .with_reason(reason),
                );
                return Err(ExecuteError::Exhausted {
                    error,
                    attempts: attempt,
                });
            }

            self.publish(
                Event::new(EventKind::BackoffScheduled)
                    .with_operation(Arc::clone(&self.operation))
                    .with_attempt(attempt)
                    .with_delay(self.policy.delay(attempt + 1))
                    .with_reason(reason),
            );
            last_error = Some(error);
            attempt += 1;
        }
    }

    fn record(
        &self,
        attempt: u32,
        at: SystemTime,
        outcome: AttemptOutcome,
        delay: std::time::Duration,
        reason: Option<Arc<str>>,
    ) {
        let Some(bus) = self.bus else { return };
        let record = AttemptRecord {
            operation: Arc::clone(&self.operation),
            attempt,
            at,
            outcome,
            delay,
            reason,
        };
        bus.publish(Event::attempt(&record));
    }

    fn interrupted<E>(&self, int: Interrupt, attempts: u32, last_error: Option<E>) -> ExecuteError<E> {
        let kind = match int {
            Interrupt::Cancelled => EventKind::CallCancelled,
            Interrupt::DeadlineExceeded => EventKind::DeadlineExceeded,
        };
        self.publish(
            Event::new(kind)
                .with_operation(Arc::clone(&self.operation))
                .with_attempt(attempts),
        );
        match int {
            Interrupt::Cancelled => ExecuteError::Cancelled {
                attempts,
                last_error,
            },
            Interrupt::DeadlineExceeded => ExecuteError::DeadlineExceeded {
                attempts,
                last_error,
            },
        }
    }

    /// A later attempt could not get its slot back: the attempts already made
    /// stay part of the outcome.
    fn readmission_failed<E>(
        &self,
        err: AdmissionError,
        attempts: u32,
        last_error: Option<E>,
    ) -> ExecuteError<E> {
        match err {
            AdmissionError::Timeout { .. } => {
                self.interrupted(Interrupt::DeadlineExceeded, attempts, last_error)
            }
            AdmissionError::Cancelled => self.interrupted(Interrupt::Cancelled, attempts, last_error),
            AdmissionError::Rejected { waiting, limit } => ExecuteError::AdmissionRejected {
                waiting,
                limit,
                attempts,
                last_error,
            },
            AdmissionError::UnknownOperation { key } => ExecuteError::UnknownOperation { key },
        }
    }

    fn publish(&self, ev: Event) {
        if let Some(bus) = self.bus {
            bus.publish(ev);
        }
    }
}
