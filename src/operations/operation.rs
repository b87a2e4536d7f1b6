//! # Operation abstraction.
//!
//! This module defines the [`Operation`] trait: an async, cancelable, fallible unit of
//! work identified by a key in the engine. The common handle type is [`OpRef`], an
//! `Arc<dyn Operation<I, V, E>>` suitable for sharing across concurrent calls.
//!
//! Each invocation receives its own clone of the input and a [`CancellationToken`]
//! that fires when the caller cancels the call. The engine never aborts an
//! attempt; honoring the token is the operation's responsibility.

use std::{future::Future, pin::Pin, sync::Arc};

use tokio_util::sync::CancellationToken;

/// Boxed future returned by [`Operation::call`].
pub type BoxOpFuture<V, E> = Pin<Box<dyn Future<Output = Result<V, E>> + Send + 'static>>;

/// Shared handle to an operation.
pub type OpRef<I, V, E> = Arc<dyn Operation<I, V, E>>;

/// # Asynchronous, cancelable, fallible unit.
///
/// # Example
/// ```
/// use tokio_util::sync::CancellationToken;
/// use opvisor::{BoxOpFuture, Operation};
///
/// struct Echo;
///
/// impl Operation<String, String, std::io::Error> for Echo {
///     fn call(&self, input: String, _ctx: CancellationToken) -> BoxOpFuture<String, std::io::Error> {
///         Box::pin(async move { Ok(input) })
///     }
/// }
/// ```
pub trait Operation<I, V, E>: Send + Sync + 'static {
    /// Creates a fresh future performing one invocation.
    ///
    /// Called once per attempt; the returned future owns everything it needs.
    fn call(&self, input: I, ctx: CancellationToken) -> BoxOpFuture<V, E>;
}
