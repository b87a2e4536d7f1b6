//! # Engine events.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **Attempt events**: retry loop flow (starting, succeeded, failed, backoff, exhausted)
//! - **Admission events**: concurrency gate outcomes (granted, timed out, cancelled, rejected)
//! - **Subscriber events**: fan-out health (overflow, panic)
//!
//! The [`Event`] struct carries the metadata: operation key, attempt number,
//! delays, admission wait time, failure reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use opvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::AttemptFailed)
//!     .with_operation("fetch")
//!     .with_reason("timeout")
//!     .with_attempt(3)
//!     .with_delay(Duration::from_millis(1000));
//!
//! assert_eq!(ev.kind, EventKind::AttemptFailed);
//! assert_eq!(ev.operation.as_deref(), Some("fetch"));
//! assert_eq!(ev.delay_ms, Some(1000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use super::record::{AttemptOutcome, AttemptRecord};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `operation`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `operation`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Attempt events ===
    /// An attempt is about to invoke the operation.
    ///
    /// Sets:
    /// - `operation`: operation key
    /// - `attempt`: attempt number (1-based, per call)
    /// - `delay_ms`: delay waited out before this attempt
    AttemptStarting,

    /// The attempt returned `Ok`.
    ///
    /// Sets: `operation`, `attempt`, `delay_ms`, `outcome`
    AttemptSucceeded,

    /// The attempt failed and was classified retryable.
    ///
    /// Sets: `operation`, `attempt`, `delay_ms`, `outcome`, `reason`
    AttemptFailed,

    /// The attempt failed and was classified fatal; the call stops here.
    ///
    /// Sets: `operation`, `attempt`, `delay_ms`, `outcome`, `reason`
    AttemptFatal,

    /// Next attempt scheduled after a retryable failure.
    ///
    /// Sets:
    /// - `operation`: operation key
    /// - `attempt`: the attempt that failed
    /// - `delay_ms`: delay before the next attempt
    /// - `reason`: last failure message
    BackoffScheduled,

    /// Every attempt failed retryably.
    ///
    /// Sets: `operation`, `attempt` (= attempts made), `reason`
    RetryExhausted,

    /// The call was cancelled between attempts.
    ///
    /// Sets: `operation`, `attempt` (= attempts made)
    CallCancelled,

    /// The call's deadline elapsed between attempts.
    ///
    /// Sets: `operation`, `attempt` (= attempts made)
    DeadlineExceeded,

    // === Admission events ===
    /// A caller obtained a concurrency slot.
    ///
    /// Sets:
    /// - `operation`: operation key
    /// - `wait_ms`: time spent waiting for the slot
    AdmissionGranted,

    /// The deadline elapsed while waiting for a slot.
    ///
    /// Sets: `operation`, `wait_ms`
    AdmissionTimedOut,

    /// The caller was cancelled while waiting for a slot.
    ///
    /// Sets: `operation`, `wait_ms`
    AdmissionCancelled,

    /// The wait queue was full; the caller was turned away.
    ///
    /// Sets: `operation`, `reason`
    AdmissionRejected,
}

/// Engine event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Operation key (or subscriber name for subscriber events).
    pub operation: Option<Arc<str>>,
    /// Attempt number (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Admission wait in milliseconds (compact).
    pub wait_ms: Option<u32>,
    /// Attempt outcome, for attempt terminal events.
    pub outcome: Option<AttemptOutcome>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            operation: None,
            attempt: None,
            delay_ms: None,
            wait_ms: None,
            outcome: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an operation key.
    #[inline]
    pub fn with_operation(mut self, operation: impl Into<Arc<str>>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Attaches an attempt number.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches an admission wait (stored as milliseconds).
    #[inline]
    pub fn with_wait(mut self, d: Duration) -> Self {
        self.wait_ms = Some(compact_ms(d));
        self
    }

    /// Builds the terminal event for one attempt.
    ///
    /// The kind follows the outcome: `AttemptSucceeded`, `AttemptFailed` or `AttemptFatal`.
    pub fn attempt(record: &AttemptRecord) -> Self {
        let kind = match record.outcome {
            AttemptOutcome::Success => EventKind::AttemptSucceeded,
            AttemptOutcome::RetryableFailure => EventKind::AttemptFailed,
            AttemptOutcome::FatalFailure => EventKind::AttemptFatal,
        };
        let mut ev = Event::new(kind)
            .with_operation(Arc::clone(&record.operation))
            .with_attempt(record.attempt)
            .with_delay(record.delay);
        ev.at = record.at;
        ev.outcome = Some(record.outcome);
        ev.reason = record.reason.clone();
        ev
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_operation(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_operation(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }

    /// Backoff delay as a [`Duration`], if set.
    pub fn delay(&self) -> Option<Duration> {
        self.delay_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }

    /// Admission wait as a [`Duration`], if set.
    pub fn wait(&self) -> Option<Duration> {
        self.wait_ms.map(|ms| Duration::from_millis(u64::from(ms)))
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::AttemptStarting);
        let b = Event::new(EventKind::AttemptStarting);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_attempt_event_follows_outcome() {
        let record = AttemptRecord {
            operation: Arc::from("fetch"),
            attempt: 2,
            at: SystemTime::now(),
            outcome: AttemptOutcome::FatalFailure,
            delay: Duration::from_millis(500),
            reason: Some(Arc::from("bad id")),
        };
        let ev = Event::attempt(&record);
        assert_eq!(ev.kind, EventKind::AttemptFatal);
        assert_eq!(ev.attempt, Some(2));
        assert_eq!(ev.delay(), Some(Duration::from_millis(500)));
        assert_eq!(ev.outcome, Some(AttemptOutcome::FatalFailure));
        assert_eq!(ev.reason.as_deref(), Some("bad id"));
        assert_eq!(ev.at, record.at);
    }

    #[test]
    fn test_huge_delay_saturates() {
        let ev = Event::new(EventKind::BackoffScheduled).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}
