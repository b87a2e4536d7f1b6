//! Engine events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to events emitted by the retry executor, the admission
//! controller and the subscriber workers.
//!
//! ## Contents
//! - [`AttemptRecord`], [`AttemptOutcome`] per-attempt observation
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`

mod bus;
mod event;
mod record;

pub use bus::Bus;
pub use event::{Event, EventKind};
pub use record::{AttemptOutcome, AttemptRecord};
