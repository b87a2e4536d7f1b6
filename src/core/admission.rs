//! # Concurrency admission controller.
//!
//! Bounds how many executions of one operation may be in flight at once.
//! Each operation key owns a **gate**: a fair [`Semaphore`] with `max_concurrent`
//! permits plus counters for observability.
//!
//! ## Flow
//! ```text
//! admit(key, ctx)
//!   ├─► ctx already cancelled / expired ─► AdmissionCancelled / AdmissionTimeout
//!   ├─► permit free and nobody queued   ─► AdmissionSlot (wait = 0)
//!   └─► enqueue (FIFO)
//!         ├─► queue_limit reached       ─► AdmissionRejected
//!         ├─► permit handed over        ─► AdmissionSlot (wait = elapsed)
//!         ├─► ctx cancelled             ─► AdmissionCancelled (no permit consumed)
//!         └─► deadline elapsed          ─► AdmissionTimeout   (no permit consumed)
//!
//! AdmissionSlot::release(self) / drop  ─► permit returned to the gate
//! ```
//!
//! ## Rules
//! - Waiters on the **same** key are admitted in arrival order (tokio's semaphore is fair);
//!   no ordering across keys.
//! - A slot is released **exactly once**: `release` consumes the slot and dropping it
//!   releases it too, so every exit path of a call gives its unit back.
//! - An abandoned wait (cancel, deadline, dropped future) never consumes a permit.
//! - Every admission outcome is published on the [`Bus`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;

use crate::{
    core::call::{CallContext, CallOptions, Interrupt},
    error::{AdmissionError, RegisterError},
    events::{Bus, Event, EventKind},
    policies::ConcurrencyPolicy,
};

/// Point-in-time counters of one gate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmissionStats {
    /// Configured capacity.
    pub max_concurrent: usize,
    /// Slots currently held.
    pub in_flight: u64,
    /// Permits currently free.
    pub available: usize,
    /// Callers currently queued.
    pub waiting: usize,
    /// Slots handed out since creation.
    pub admitted: u64,
    /// Slots given back since creation.
    pub released: u64,
}

/// Counting resource of one operation key.
pub(crate) struct Gate {
    key: Arc<str>,
    bus: Bus,
    policy: ConcurrencyPolicy,
    semaphore: Arc<Semaphore>,
    waiting: AtomicUsize,
    admitted: AtomicU64,
    released: AtomicU64,
}

impl Gate {
    pub(crate) fn new(key: Arc<str>, policy: ConcurrencyPolicy, bus: Bus) -> Self {
        Self {
            key,
            bus,
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent())),
            policy,
            waiting: AtomicUsize::new(0),
            admitted: AtomicU64::new(0),
            released: AtomicU64::new(0),
        }
    }

    /// Waits for one unit of capacity.
    pub(crate) async fn admit(self: &Arc<Self>, ctx: &CallContext) -> Result<AdmissionSlot, AdmissionError> {
        let started = Instant::now();
        if let Err(int) = ctx.check() {
            return Err(self.interrupted(int, Duration::ZERO));
        }

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.grant(permit, Duration::ZERO)),
            Err(TryAcquireError::Closed) => {
                return Err(self.interrupted(Interrupt::Cancelled, Duration::ZERO));
            }
            Err(TryAcquireError::NoPermits) => {}
        }

        let _queued = self.enqueue()?;
        let acquired = ctx
            .guard(Arc::clone(&self.semaphore).acquire_owned())
            .await;
        let waited = started.elapsed();

        match acquired {
            Ok(Ok(permit)) => Ok(self.grant(permit, waited)),
            Ok(Err(_closed)) => Err(self.interrupted(Interrupt::Cancelled, waited)),
            Err(int) => Err(self.interrupted(int, waited)),
        }
    }

    pub(crate) fn stats(&self) -> AdmissionStats {
        let admitted = self.admitted.load(Ordering::Acquire);
        let released = self.released.load(Ordering::Acquire);
        AdmissionStats {
            max_concurrent: self.policy.max_concurrent(),
            in_flight: admitted.saturating_sub(released),
            available: self.semaphore.available_permits(),
            waiting: self.waiting.load(Ordering::Acquire),
            admitted,
            released,
        }
    }

    /// Registers the caller as waiting, unless the queue bound is reached.
    fn enqueue(&self) -> Result<QueuedGuard<'_>, AdmissionError> {
        let ahead = self.waiting.fetch_add(1, Ordering::AcqRel);
        let guard = QueuedGuard {
            waiting: &self.waiting,
        };

        if let Some(limit) = self.policy.queue_limit() {
            if ahead >= limit {
                drop(guard);
                self.bus.publish(
                    Event::new(EventKind::AdmissionRejected)
                        .with_operation(Arc::clone(&self.key))
                        .with_reason(format!("waiting={ahead} limit={limit}")),
                );
                return Err(AdmissionError::Rejected {
                    waiting: ahead,
                    limit,
                });
            }
        }
        Ok(guard)
    }

    fn grant(self: &Arc<Self>, permit: OwnedSemaphorePermit, waited: Duration) -> AdmissionSlot {
        self.admitted.fetch_add(1, Ordering::AcqRel);
        self.bus.publish(
            Event::new(EventKind::AdmissionGranted)
                .with_operation(Arc::clone(&self.key))
                .with_wait(waited),
        );
        AdmissionSlot {
            gate: Arc::clone(self),
            _permit: permit,
        }
    }

    fn interrupted(&self, int: Interrupt, waited: Duration) -> AdmissionError {
        let (kind, err) = match int {
            Interrupt::Cancelled => (EventKind::AdmissionCancelled, AdmissionError::Cancelled),
            Interrupt::DeadlineExceeded => (
                EventKind::AdmissionTimedOut,
                AdmissionError::Timeout { waited },
            ),
        };
        self.bus.publish(
            Event::new(kind)
                .with_operation(Arc::clone(&self.key))
                .with_wait(waited),
        );
        err
    }
}

/// Decrements the waiting counter on every exit path of a queued wait.
struct QueuedGuard<'a> {
    waiting: &'a AtomicUsize,
}

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.waiting.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One unit of concurrency capacity held by an in-flight execution.
///
/// Released by [`AdmissionSlot::release`] or by dropping it, whichever comes first
/// (a slot cannot be released twice: `release` consumes it).
#[must_use = "dropping an AdmissionSlot releases it immediately"]
pub struct AdmissionSlot {
    gate: Arc<Gate>,
    _permit: OwnedSemaphorePermit,
}

impl AdmissionSlot {
    /// Operation key this slot belongs to.
    pub fn operation(&self) -> &str {
        &self.gate.key
    }

    /// Returns the unit of capacity to the gate.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for AdmissionSlot {
    fn drop(&mut self) {
        let released = self.gate.released.fetch_add(1, Ordering::AcqRel) + 1;
        debug_assert!(
            released <= self.gate.admitted.load(Ordering::Acquire),
            "operation '{}': more slots released than admitted",
            self.gate.key
        );
    }
}

impl std::fmt::Debug for AdmissionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionSlot")
            .field("operation", &self.gate.key)
            .finish()
    }
}

/// Per-key admission gates.
///
/// Used by the [`Engine`](crate::Engine) for bindings with a [`ConcurrencyPolicy`], and
/// usable on its own to gate arbitrary sections of code.
///
/// ## Example
/// ```rust
/// use opvisor::{AdmissionController, Bus, CallOptions, ConcurrencyPolicy};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut ctrl = AdmissionController::new(Bus::new(16));
/// ctrl.register("heavy", ConcurrencyPolicy::new(2).unwrap()).unwrap();
///
/// let slot = ctrl.admit("heavy", &CallOptions::new()).await.unwrap();
/// assert_eq!(ctrl.stats("heavy").unwrap().in_flight, 1);
/// ctrl.release(slot);
/// assert_eq!(ctrl.stats("heavy").unwrap().in_flight, 0);
/// # }
/// ```
pub struct AdmissionController {
    gates: HashMap<Arc<str>, Arc<Gate>>,
    bus: Bus,
}

impl AdmissionController {
    /// Creates a controller without gates; admission outcomes are published on `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            gates: HashMap::new(),
            bus,
        }
    }

    /// Creates the gate for `key`.
    pub fn register(
        &mut self,
        key: impl Into<Arc<str>>,
        policy: ConcurrencyPolicy,
    ) -> Result<(), RegisterError> {
        let key = key.into();
        if self.gates.contains_key(&key) {
            return Err(RegisterError::Duplicate {
                key: key.to_string(),
            });
        }
        let gate = Gate::new(Arc::clone(&key), policy, self.bus.clone());
        self.gates.insert(key, Arc::new(gate));
        Ok(())
    }

    /// Waits for a slot of `key`, honoring the deadline and cancellation in `opts`.
    pub async fn admit(
        &self,
        key: &str,
        opts: &CallOptions,
    ) -> Result<AdmissionSlot, AdmissionError> {
        let gate = self
            .gates
            .get(key)
            .ok_or_else(|| AdmissionError::UnknownOperation {
                key: key.to_string(),
            })?;
        gate.admit(&CallContext::from(opts)).await
    }

    /// Returns a slot to its gate. Equivalent to [`AdmissionSlot::release`].
    pub fn release(&self, slot: AdmissionSlot) {
        slot.release();
    }

    /// Counters of the gate for `key`.
    pub fn stats(&self, key: &str) -> Option<AdmissionStats> {
        self.gates.get(key).map(|g| g.stats())
    }

    /// True if a gate exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.gates.contains_key(key)
    }

    pub(crate) fn gate(&self, key: &str) -> Option<&Arc<Gate>> {
        self.gates.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn controller(max: usize) -> Arc<AdmissionController> {
        let mut ctrl = AdmissionController::new(Bus::new(64));
        ctrl.register("op", ConcurrencyPolicy::new(max).unwrap())
            .unwrap();
        Arc::new(ctrl)
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_admission_when_capacity_free() {
        let ctrl = controller(2);
        let a = ctrl.admit("op", &CallOptions::new()).await.unwrap();
        let b = ctrl.admit("op", &CallOptions::new()).await.unwrap();
        assert_eq!(a.operation(), "op");

        let stats = ctrl.stats("op").unwrap();
        assert_eq!(stats.available, 0);
        assert_eq!(stats.in_flight, 2);

        ctrl.release(a);
        b.release();
        let stats = ctrl.stats("op").unwrap();
        assert_eq!(stats.available, 2);
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.admitted, 2);
        assert_eq!(stats.released, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_key() {
        let ctrl = controller(1);
        let err = ctrl.admit("nope", &CallOptions::new()).await.unwrap_err();
        assert_eq!(err, AdmissionError::UnknownOperation { key: "nope".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_gate_rejected() {
        let mut ctrl = AdmissionController::new(Bus::new(1));
        ctrl.register("op", ConcurrencyPolicy::new(1).unwrap()).unwrap();
        let err = ctrl
            .register("op", ConcurrencyPolicy::new(3).unwrap())
            .unwrap_err();
        assert_eq!(err.as_label(), "register_duplicate");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiters_admitted_in_arrival_order() {
        let ctrl = controller(1);
        let order = Arc::new(Mutex::new(Vec::new()));
        let held = ctrl.admit("op", &CallOptions::new()).await.unwrap();

        let mut joins = Vec::new();
        for id in 0..5 {
            let ctrl = Arc::clone(&ctrl);
            let order = Arc::clone(&order);
            joins.push(tokio::spawn(async move {
                let slot = ctrl.admit("op", &CallOptions::new()).await.unwrap();
                order.lock().unwrap().push(id);
                tokio::time::sleep(Duration::from_millis(5)).await;
                slot.release();
            }));
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(ctrl.stats("op").unwrap().waiting, 5);

        held.release();
        for j in joins {
            j.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(ctrl.stats("op").unwrap().waiting, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_wait_consumes_no_capacity() {
        let ctrl = controller(1);
        let held = ctrl.admit("op", &CallOptions::new()).await.unwrap();

        let token = CancellationToken::new();
        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            let opts = CallOptions::new().with_cancel(token.clone());
            tokio::spawn(async move { ctrl.admit("op", &opts).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ctrl.stats("op").unwrap().waiting, 1);

        token.cancel();
        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err, AdmissionError::Cancelled);

        let stats = ctrl.stats("op").unwrap();
        assert_eq!(stats.waiting, 0);
        assert_eq!(stats.admitted, 1);

        held.release();
        assert_eq!(ctrl.stats("op").unwrap().available, 1);
        let again = ctrl.admit("op", &CallOptions::new()).await.unwrap();
        again.release();
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_while_waiting() {
        let ctrl = controller(1);
        let held = ctrl.admit("op", &CallOptions::new()).await.unwrap();

        let opts = CallOptions::new().with_timeout(Duration::from_millis(250));
        let err = ctrl.admit("op", &opts).await.unwrap_err();
        assert_eq!(
            err,
            AdmissionError::Timeout {
                waited: Duration::from_millis(250)
            }
        );
        assert_eq!(ctrl.stats("op").unwrap().admitted, 1);
        held.release();
        assert_eq!(ctrl.stats("op").unwrap().available, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_limit_rejects_overflow() {
        let mut ctrl = AdmissionController::new(Bus::new(16));
        ctrl.register("op", ConcurrencyPolicy::new(1).unwrap().with_queue_limit(1))
            .unwrap();
        let ctrl = Arc::new(ctrl);
        let held = ctrl.admit("op", &CallOptions::new()).await.unwrap();

        let queued = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.admit("op", &CallOptions::new()).await.map(|s| s.release()) })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;

        let err = ctrl.admit("op", &CallOptions::new()).await.unwrap_err();
        assert_eq!(err, AdmissionError::Rejected { waiting: 1, limit: 1 });

        held.release();
        queued.await.unwrap().unwrap();
        assert_eq!(ctrl.stats("op").unwrap().in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_is_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let mut ctrl = AdmissionController::new(bus);
        ctrl.register("op", ConcurrencyPolicy::new(1).unwrap()).unwrap();
        let ctrl = Arc::new(ctrl);

        let held = ctrl.admit("op", &CallOptions::new()).await.unwrap();
        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.admit("op", &CallOptions::new()).await.map(|s| s.release()) })
        };
        tokio::time::sleep(Duration::from_millis(40)).await;
        held.release();
        waiter.await.unwrap().unwrap();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::AdmissionGranted);
        assert_eq!(first.wait(), Some(Duration::ZERO));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::AdmissionGranted);
        assert_eq!(second.operation.as_deref(), Some("op"));
        assert_eq!(second.wait(), Some(Duration::from_millis(40)));
    }
}
