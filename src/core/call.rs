//! # Per-call options: deadline and cancellation.
//!
//! [`CallOptions`] lets a caller bound one execution call in time and/or tie it to
//! a [`CancellationToken`]. The engine observes both at its suspension points only:
//!
//! - before the first attempt,
//! - while waiting for admission,
//! - while waiting out a backoff delay.
//!
//! A running attempt is never aborted. The operation receives a child of the
//! caller's token, which is also cancelled once the deadline elapses, and decides
//! itself how to react.

use std::future::Future;
use std::time::Duration;

use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation for one execution call.
///
/// ## Example
/// ```rust
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
/// use opvisor::CallOptions;
///
/// let token = CancellationToken::new();
/// let opts = CallOptions::new()
///     .with_timeout(Duration::from_secs(2))
///     .with_cancel(token.clone());
/// assert!(opts.deadline().is_some());
/// ```
#[derive(Clone, Debug, Default)]
pub struct CallOptions {
    deadline: Option<Instant>,
    cancel: Option<CancellationToken>,
}

impl CallOptions {
    /// No deadline, no cancellation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute deadline for the whole call.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(deadline)
    }

    /// Cancellation token observed by the call (and, as a child, by the operation).
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Configured deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Configured cancellation token, if any.
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }
}

/// Why a suspension point gave up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// Resolved per-call context used by the executor and the admission controller.
#[derive(Clone, Debug)]
pub(crate) struct CallContext {
    pub token: CancellationToken,
    pub deadline: Option<Instant>,
}

impl From<&CallOptions> for CallContext {
    fn from(opts: &CallOptions) -> Self {
        Self {
            token: opts.cancel.clone().unwrap_or_default(),
            deadline: opts.deadline,
        }
    }
}

impl CallContext {
    /// Checks cancellation and deadline without suspending.
    pub fn check(&self) -> Result<(), Interrupt> {
        if self.token.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(d) if d <= Instant::now() => Err(Interrupt::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Awaits `fut` unless the call is cancelled or its deadline elapses first.
    ///
    /// Cancellation wins over the deadline, the deadline wins over a ready `fut`.
    /// `fut` is dropped on interruption.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, Interrupt> {
        let deadline = async {
            match self.deadline {
                Some(d) => time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupt::Cancelled),
            _ = deadline => Err(Interrupt::DeadlineExceeded),
            out = fut => Ok(out),
        }
    }
}

/// Awaits one attempt, cancelling `child` when `deadline` elapses first.
///
/// The attempt keeps running after the signal until it returns on its own.
pub(crate) async fn signal_deadline<F: Future>(
    deadline: Option<Instant>,
    child: CancellationToken,
    fut: F,
) -> F::Output {
    let Some(deadline) = deadline else {
        return fut.await;
    };
    tokio::pin!(fut);
    tokio::select! {
        biased;
        out = &mut fut => return out,
        _ = time::sleep_until(deadline) => child.cancel(),
    }
    fut.await
}

fn far_future() -> Instant {
    // Roughly 30 years; tokio's timer rejects `Instant` values it cannot represent.
    Instant::now() + Duration::from_secs(86400 * 365 * 30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_guard_passes_through_when_idle() {
        let ctx = CallContext::from(&CallOptions::new());
        let out = ctx.guard(async { 7 }).await;
        assert_eq!(out, Ok(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_guard_hits_deadline() {
        let ctx = CallContext::from(&CallOptions::new().with_timeout(Duration::from_millis(100)));
        let started = Instant::now();
        let out = ctx.guard(time::sleep(Duration::from_secs(10))).await;
        assert_eq!(out, Err(Interrupt::DeadlineExceeded));
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_wins_over_deadline() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::from(
            &CallOptions::new()
                .with_timeout(Duration::ZERO)
                .with_cancel(token),
        );
        assert_eq!(ctx.check(), Err(Interrupt::Cancelled));
        assert_eq!(ctx.guard(async {}).await, Err(Interrupt::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_is_observed_by_check() {
        let ctx = CallContext::from(&CallOptions::new().with_timeout(Duration::ZERO));
        assert_eq!(ctx.check(), Err(Interrupt::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_running_attempt_token() {
        let child = CancellationToken::new();
        let seen = child.clone();
        let started = Instant::now();
        let out = signal_deadline(Some(Instant::now() + Duration::from_millis(200)), child, async move {
            seen.cancelled().await;
            "stopped"
        })
        .await;
        assert_eq!(out, "stopped");
        assert_eq!(started.elapsed(), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_finishing_in_time_keeps_token() {
        let child = CancellationToken::new();
        signal_deadline(
            Some(Instant::now() + Duration::from_millis(200)),
            child.clone(),
            time::sleep(Duration::from_millis(50)),
        )
        .await;
        assert!(!child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_does_not_overflow() {
        let opts = CallOptions::new().with_timeout(Duration::MAX);
        assert!(opts.deadline().is_some());
    }
}
