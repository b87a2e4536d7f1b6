//! # opvisor
//!
//! **Opvisor** is a resilient execution policy engine for async Rust.
//!
//! It wraps arbitrary fallible operations with bounded retry (exponential backoff,
//! no jitter) and bounded-concurrency admission control, and composes both
//! deterministically when they are bound to the same operation. The engine does
//! not know what an operation does: a database call, a network call and a
//! computation look the same to it.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   caller ──► Engine::execute(key, input, opts)
//!                   │
//! ┌─────────────────▼─────────────────────────────────────────────────┐
//! │  Engine (policy composer)                                         │
//! │  - OperationBinding per key (retry?, concurrency?, composition)   │
//! │  - AdmissionController (one FIFO gate per limited key)            │
//! │  - Bus (broadcast events)                                         │
//! └──────┬──────────────────────────┬─────────────────────────────────┘
//!        ▼                          ▼
//! ┌──────────────┐          ┌────────────────┐
//! │     Gate     │  slot ─► │ RetryExecutor  │ ─► Operation::call(input, token)
//! │ (semaphore)  │          │  (retry loop)  │
//! └──────┬───────┘          └───────┬────────┘
//!        │ Publishes:               │ Publishes:
//!        │ - AdmissionGranted       │ - AttemptStarting / Succeeded / Failed / Fatal
//!        │ - AdmissionTimedOut      │ - BackoffScheduled
//!        │ - AdmissionCancelled     │ - RetryExhausted
//!        │ - AdmissionRejected      │ - CallCancelled / DeadlineExceeded
//!        ▼                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                       │
//! │               (capacity: EngineConfig::bus_capacity)              │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber listener   │
//!                       │      (in Engine)       │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                          (per-sub queues)
//!                        ┌──────────┼──────────┐
//!                        ▼          ▼          ▼
//!                   sub1.on    sub2.on    subN.on
//!                   _event()   _event()   _event()
//! ```
//!
//! ### Lifecycle of one call (AdmitOnce)
//! ```text
//! execute(key, input, opts)
//!   ├─► binding lookup            (UnknownOperation)
//!   ├─► admit (FIFO, cancellable) (AdmissionTimeout / AdmissionCancelled / AdmissionRejected)
//!   ├─► loop {
//!   │     ├─► attempt == 1 ? check cancel/deadline : sleep(delay(attempt)) (cancellable)
//!   │     ├─► publish AttemptStarting{ attempt, delay }
//!   │     ├─► op.call(input.clone(), child_token)
//!   │     │     ├─ Ok  ──► AttemptSucceeded, return value
//!   │     │     └─ Err ──► classify
//!   │     │                ├─ Fatal     ─► AttemptFatal, return Fatal
//!   │     │                └─ Retryable ─► AttemptFailed
//!   │     │                     ├─ attempt == max ─► RetryExhausted, return Exhausted
//!   │     │                     └─ BackoffScheduled{ delay(attempt + 1) }, attempt += 1
//!   │   }
//!   └─► release slot (every exit path)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                          |
//! |-------------------|--------------------------------------------------------------|---------------------------------------------|
//! | **Composition**   | Bind operations to policies and execute them by key.         | [`Engine`], [`EngineBuilder`], [`OperationBinding`] |
//! | **Retry**         | Bounded retry with exponential backoff.                      | [`RetryPolicy`], [`RetryExecutor`], [`backoff_delay`] |
//! | **Admission**     | Per-key FIFO concurrency limit.                              | [`ConcurrencyPolicy`], [`AdmissionController`], [`AdmissionSlot`] |
//! | **Subscriber API**| Hook into attempt and admission events.                      | [`Subscribe`], [`Event`], [`AttemptRecord`] |
//! | **Errors**        | Typed errors with stable labels.                             | [`ExecuteError`], [`RegisterError`], [`InvalidPolicy`] |
//! | **Configuration** | Engine settings and per-operation policies from TOML.        | [`EngineConfig`]                            |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (renders events through `tracing`).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use opvisor::{
//!     CallOptions, ConcurrencyPolicy, Engine, EngineConfig, ErrorClass, OpFn, OperationBinding,
//!     RetryPolicy,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn opvisor::Subscribe>> = vec![Arc::new(opvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn opvisor::Subscribe>> = Vec::new();
//!
//!     let fetch = OperationBinding::new(
//!         "fetch",
//!         OpFn::arc(|id: u64, _ctx: CancellationToken| async move {
//!             if id == 0 {
//!                 return Err("bad input: id 0".to_string());
//!             }
//!             Ok(format!("record {id}"))
//!         }),
//!     )
//!     .with_retry(RetryPolicy::new(4, Duration::from_millis(50), 2.0, Duration::from_secs(1))?)
//!     .with_concurrency(ConcurrencyPolicy::new(2)?)
//!     .with_classifier(|e: &String| {
//!         if e.starts_with("bad input") { ErrorClass::Fatal } else { ErrorClass::Retryable }
//!     });
//!
//!     let engine = Engine::builder(EngineConfig::default())
//!         .with_subscribers(subs)
//!         .register(fetch)?
//!         .build();
//!
//!     let opts = CallOptions::new().with_timeout(Duration::from_secs(2));
//!     assert_eq!(engine.execute_with("fetch", 7, &opts).await?, "record 7");
//!     assert_eq!(engine.execute("fetch", 0).await.unwrap_err().attempts(), 1);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod operations;
mod policies;
mod subscribers;

// ---- Public re-exports ----

pub use config::{ConcurrencyConfig, EngineConfig, OperationConfig, RetryConfig};
pub use crate::core::{
    AdmissionController, AdmissionSlot, AdmissionStats, CallOptions, Engine, EngineBuilder,
    RetryExecutor,
};
pub use error::{AdmissionError, ConfigError, ExecuteError, InvalidPolicy, RegisterError};
pub use events::{AttemptOutcome, AttemptRecord, Bus, Event, EventKind};
pub use operations::{BoxOpFuture, OpFn, OpRef, Operation, OperationBinding};
pub use policies::{
    Classifier, Composition, ConcurrencyPolicy, ErrorClass, RetryPolicy, backoff_delay, retry_all,
};
pub use subscribers::{Subscribe, SubscriberSet};

#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
