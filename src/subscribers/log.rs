//! # LogWriter: renders events as `tracing` records
//!
//! A minimal subscriber turning every [`Event`] into one structured `tracing`
//! record under the `opvisor` target. Install any `tracing` subscriber
//! (e.g. `tracing_subscriber::fmt`) to see the output.
//!
//! ## Example output (fmt layer)
//! ```text
//! DEBUG opvisor: attempt starting operation="fetch" attempt=1 delay_ms=0
//!  WARN opvisor: attempt failed operation="fetch" attempt=1 reason="connection refused"
//!  INFO opvisor: backoff scheduled operation="fetch" after_attempt=1 delay_ms=500
//!  INFO opvisor: attempt succeeded operation="fetch" attempt=2
//!  INFO opvisor: admission granted operation="heavy" wait_ms=200
//! ERROR opvisor: retries exhausted operation="save" attempts=3 reason="disk full"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let op = e.operation.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::AttemptStarting => {
                debug!(target: "opvisor", operation = op, attempt = e.attempt, delay_ms = e.delay_ms, "attempt starting");
            }
            EventKind::AttemptSucceeded => {
                info!(target: "opvisor", operation = op, attempt = e.attempt, "attempt succeeded");
            }
            EventKind::AttemptFailed => {
                warn!(target: "opvisor", operation = op, attempt = e.attempt, reason, "attempt failed");
            }
            EventKind::AttemptFatal => {
                error!(target: "opvisor", operation = op, attempt = e.attempt, reason, "attempt failed fatally");
            }
            EventKind::BackoffScheduled => {
                info!(target: "opvisor", operation = op, after_attempt = e.attempt, delay_ms = e.delay_ms, "backoff scheduled");
            }
            EventKind::RetryExhausted => {
                error!(target: "opvisor", operation = op, attempts = e.attempt, reason, "retries exhausted");
            }
            EventKind::CallCancelled => {
                warn!(target: "opvisor", operation = op, attempts = e.attempt, "call cancelled");
            }
            EventKind::DeadlineExceeded => {
                warn!(target: "opvisor", operation = op, attempts = e.attempt, "deadline exceeded");
            }
            EventKind::AdmissionGranted => {
                info!(target: "opvisor", operation = op, wait_ms = e.wait_ms, "admission granted");
            }
            EventKind::AdmissionTimedOut => {
                warn!(target: "opvisor", operation = op, wait_ms = e.wait_ms, "admission timed out");
            }
            EventKind::AdmissionCancelled => {
                warn!(target: "opvisor", operation = op, wait_ms = e.wait_ms, "admission cancelled");
            }
            EventKind::AdmissionRejected => {
                warn!(target: "opvisor", operation = op, reason, "admission rejected");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: "opvisor", subscriber = op, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                error!(target: "opvisor", subscriber = op, info = reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
