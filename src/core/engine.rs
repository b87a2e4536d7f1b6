//! # Engine: composes retry and admission around registered operations.
//!
//! The [`Engine`] owns every [`OperationBinding`], the [`AdmissionController`]
//! holding one gate per concurrency-limited key, and the event [`Bus`].
//! It exposes a single entry point, [`Engine::execute`].
//!
//! ## Composition
//! ```text
//! execute(key, input, opts)
//!   ├─► key unknown                      ─► UnknownOperation
//!   │
//!   ├─► retry + concurrency, AdmitOnce:
//!   │     admit ─► RetryExecutor::run ─► release (every exit path)
//!   ├─► retry + concurrency, AdmitPerAttempt:
//!   │     RetryExecutor::run { admit ─► attempt ─► release ─► backoff } ...
//!   ├─► retry only:
//!   │     RetryExecutor::run (no admission)
//!   ├─► concurrency only:
//!   │     admit ─► invoke once ─► release
//!   └─► neither:
//!         invoke once (passthrough)
//! ```
//!
//! ## Rules
//! - Composition is fixed per binding at registration time.
//! - With `AdmitOnce` a call holds its slot across all attempts and delays.
//! - No slot is held once `execute` returns, whatever the outcome.
//! - Without a retry policy the single failure surfaces as [`ExecuteError::Failed`].
//! - Each attempt receives its own clone of the input and a child token of the call,
//!   cancelled when the call is cancelled or its deadline elapses.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use opvisor::{ConcurrencyPolicy, Engine, EngineConfig, OpFn, OperationBinding, RetryPolicy};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder(EngineConfig::default())
//!     .register(
//!         OperationBinding::new(
//!             "save",
//!             OpFn::arc(|name: String, _ctx: CancellationToken| async move {
//!                 Ok::<_, String>(format!("saved {name}"))
//!             }),
//!         )
//!         .with_retry(RetryPolicy::fixed(3, Duration::from_millis(10))?)
//!         .with_concurrency(ConcurrencyPolicy::new(2)?),
//!     )?
//!     .build();
//!
//! let out = engine.execute("save", "alice".to_string()).await?;
//! assert_eq!(out, "saved alice");
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;

use tokio::{sync::broadcast, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{
    config::EngineConfig,
    core::{
        admission::{AdmissionController, AdmissionStats},
        builder::EngineBuilder,
        call::{CallContext, CallOptions, signal_deadline},
        retry::RetryExecutor,
    },
    error::ExecuteError,
    events::{Bus, Event},
    operations::OperationBinding,
    policies::{Composition, RetryPolicy},
    subscribers::SubscriberSet,
};

/// Fan-out listener forwarding bus events to the subscriber set.
pub(crate) struct Listener {
    pub(crate) token: CancellationToken,
    pub(crate) handle: JoinHandle<()>,
    pub(crate) subs: Arc<SubscriberSet>,
}

/// Policy composer hosting operations of one `I -> Result<V, E>` shape.
///
/// Build with [`Engine::builder`]. Share across tasks behind an `Arc`.
pub struct Engine<I, V, E> {
    entries: HashMap<Arc<str>, OperationBinding<I, V, E>>,
    admission: AdmissionController,
    bus: Bus,
    listener: Option<Listener>,
}

impl<I, V, E> Engine<I, V, E>
where
    I: Clone + Send + Sync + 'static,
    V: Send + 'static,
    E: Display + Send + 'static,
{
    /// Starts building an engine from `cfg`.
    pub fn builder(cfg: EngineConfig) -> EngineBuilder<I, V, E> {
        EngineBuilder::new(cfg)
    }

    pub(crate) fn new_internal(
        entries: HashMap<Arc<str>, OperationBinding<I, V, E>>,
        admission: AdmissionController,
        bus: Bus,
        listener: Option<Listener>,
    ) -> Self {
        Self {
            entries,
            admission,
            bus,
            listener,
        }
    }

    /// Executes the operation bound under `key` with default [`CallOptions`]
    /// (no deadline, not cancellable).
    pub async fn execute(&self, key: &str, input: I) -> Result<V, ExecuteError<E>> {
        self.execute_with(key, input, &CallOptions::new()).await
    }

    /// Executes the operation bound under `key`, honoring the deadline and
    /// cancellation token in `opts`.
    ///
    /// ### Errors
    /// - [`ExecuteError::UnknownOperation`] if nothing is bound under `key`;
    /// - admission errors while waiting for a slot;
    /// - retry outcomes ([`ExecuteError::Exhausted`], [`ExecuteError::Fatal`],
    ///   [`ExecuteError::Cancelled`], [`ExecuteError::DeadlineExceeded`]);
    /// - [`ExecuteError::Failed`] for a failed single invocation.
    pub async fn execute_with(
        &self,
        key: &str,
        input: I,
        opts: &CallOptions,
    ) -> Result<V, ExecuteError<E>> {
        let binding = self
            .entries
            .get(key)
            .ok_or_else(|| ExecuteError::UnknownOperation {
                key: key.to_string(),
            })?;

        let ctx = CallContext::from(opts);
        let once = RetryPolicy::once();
        let policy = binding.retry().unwrap_or(&once);
        let exec = RetryExecutor::new(policy)
            .for_operation(Arc::clone(binding.key_arc()))
            .with_bus(&self.bus);

        let op = binding.operation();
        let classifier = binding.classifier();
        let invoke = |_attempt: u32| {
            let child = ctx.token.child_token();
            signal_deadline(ctx.deadline, child.clone(), op.call(input.clone(), child))
        };
        let classify = |e: &E| classifier(e);

        let res = match (self.admission.gate(key), binding.composition()) {
            (Some(gate), Composition::AdmitOnce) => {
                let slot = gate.admit(&ctx).await?;
                let res = exec.run_in(invoke, classify, &ctx).await;
                slot.release();
                res
            }
            (Some(gate), Composition::AdmitPerAttempt) => {
                exec.with_gate(gate).run_in(invoke, classify, &ctx).await
            }
            (None, _) => exec.run_in(invoke, classify, &ctx).await,
        };

        match binding.retry() {
            Some(_) => res,
            None => res.map_err(single_invocation),
        }
    }

    /// Returns a raw receiver of every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Admission counters for `key`, if it is concurrency-limited.
    pub fn admission_stats(&self, key: &str) -> Option<AdmissionStats> {
        self.admission.stats(key)
    }

    /// True if an operation is bound under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Registered operation keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_ref())
    }

    /// The binding registered under `key`.
    pub fn binding(&self, key: &str) -> Option<&OperationBinding<I, V, E>> {
        self.entries.get(key)
    }

    /// Stops the subscriber listener and waits for subscribers to drain.
    ///
    /// Events already on the bus are still delivered. Without subscribers this is a no-op.
    pub async fn shutdown(mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        listener.token.cancel();
        if let Err(e) = listener.handle.await {
            tracing::warn!(error = %e, "subscriber listener ended abnormally");
        }
        match Arc::try_unwrap(listener.subs) {
            Ok(set) => set.shutdown().await,
            Err(_) => tracing::warn!("subscriber set still shared at shutdown; workers left running"),
        }
    }
}

impl<I, V, E> Drop for Engine<I, V, E> {
    fn drop(&mut self) {
        if let Some(listener) = &self.listener {
            listener.token.cancel();
        }
    }
}

/// Without a retry policy there is nothing to exhaust: any failure is a plain failure.
fn single_invocation<E>(err: ExecuteError<E>) -> ExecuteError<E> {
    match err {
        ExecuteError::Exhausted { error, .. } | ExecuteError::Fatal { error, .. } => {
            ExecuteError::Failed { error }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use tokio::time::Instant;

    use crate::operations::OpFn;
    use crate::policies::{ConcurrencyPolicy, ErrorClass};

    type TestEngine = Engine<u32, u32, String>;

    fn flaky(fail_first: u32, calls: Arc<AtomicU32>) -> OperationBinding<u32, u32, String> {
        OperationBinding::new(
            "flaky",
            OpFn::arc(move |n: u32, _ctx: CancellationToken| {
                let calls = Arc::clone(&calls);
                async move {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    if attempt <= fail_first {
                        Err(format!("attempt {attempt} failed"))
                    } else {
                        Ok(n)
                    }
                }
            }),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_operation() {
        let engine: TestEngine = Engine::builder(EngineConfig::default()).build();
        let err = engine.execute("missing", 1).await.unwrap_err();
        assert!(matches!(err, ExecuteError::UnknownOperation { ref key } if key == "missing"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_passthrough_invokes_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(flaky(5, Arc::clone(&calls)))
            .unwrap()
            .build();

        let err = engine.execute("flaky", 7).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { ref error } if error == "attempt 1 failed"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_without_retry_is_plain_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(flaky(1, Arc::clone(&calls)).with_classifier(|_e: &String| ErrorClass::Fatal))
            .unwrap()
            .build();

        let err = engine.execute("flaky", 7).await.unwrap_err();
        assert_eq!(err.as_label(), "execute_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_only_skips_admission() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(
                flaky(2, Arc::clone(&calls))
                    .with_retry(RetryPolicy::fixed(3, Duration::from_millis(100)).unwrap()),
            )
            .unwrap()
            .build();

        let start = Instant::now();
        assert_eq!(engine.execute("flaky", 9).await.unwrap(), 9);
        assert_eq!(start.elapsed(), Duration::from_millis(200));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(engine.admission_stats("flaky").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_only_invokes_once_and_releases() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(flaky(1, Arc::clone(&calls)).with_concurrency(ConcurrencyPolicy::new(1).unwrap()))
            .unwrap()
            .build();

        let err = engine.execute("flaky", 1).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { .. }));
        assert_eq!(engine.execute("flaky", 2).await.unwrap(), 2);

        let stats = engine.admission_stats("flaky").unwrap();
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_backoff_releases_slot() {
        let calls = Arc::new(AtomicU32::new(0));
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(
                flaky(10, Arc::clone(&calls))
                    .with_retry(RetryPolicy::fixed(5, Duration::from_secs(1)).unwrap())
                    .with_concurrency(ConcurrencyPolicy::new(1).unwrap()),
            )
            .unwrap()
            .build();

        let opts = CallOptions::new().with_timeout(Duration::from_millis(1500));
        let err = engine.execute_with("flaky", 1, &opts).await.unwrap_err();
        match err {
            ExecuteError::DeadlineExceeded { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert_eq!(last_error.as_deref(), Some("attempt 2 failed"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert_eq!(engine.admission_stats("flaky").unwrap().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_sees_call_cancellation() {
        let token = CancellationToken::new();
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(OperationBinding::new(
                "wait",
                OpFn::arc(|n: u32, ctx: CancellationToken| async move {
                    ctx.cancelled().await;
                    Err::<u32, _>(format!("stopped {n}"))
                }),
            ))
            .unwrap()
            .build();

        let cancel = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });
        let err = engine
            .execute_with("wait", 3, &CallOptions::new().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { ref error } if error == "stopped 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_operation_sees_deadline_expiry() {
        let engine: TestEngine = Engine::builder(EngineConfig::default())
            .register(OperationBinding::new(
                "wait",
                OpFn::arc(|n: u32, ctx: CancellationToken| async move {
                    ctx.cancelled().await;
                    Err::<u32, _>(format!("expired {n}"))
                }),
            ))
            .unwrap()
            .build();

        let started = Instant::now();
        let opts = CallOptions::new().with_timeout(Duration::from_millis(300));
        let err = engine.execute_with("wait", 4, &opts).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Failed { ref error } if error == "expired 4"));
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }
}
