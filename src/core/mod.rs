//! Engine core: admission, retry and their composition.
//!
//! The public entry point is [`Engine`] (built with [`EngineBuilder`]). The
//! retry loop and the admission gates are usable on their own as well.
//!
//! Internal modules:
//! - `call`: per-call deadline and cancellation ([`CallOptions`]);
//! - `admission`: per-key FIFO gates and slots;
//! - `retry`: the retry loop with backoff and attempt records;
//! - `engine`: composes admission and retry per binding;
//! - `builder`: registration and subscriber wiring.

mod admission;
mod builder;
mod call;
mod engine;
mod retry;

pub use admission::{AdmissionController, AdmissionSlot, AdmissionStats};
pub use builder::EngineBuilder;
pub use call::CallOptions;
pub use engine::Engine;
pub use retry::RetryExecutor;
