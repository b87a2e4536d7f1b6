//! # Function-backed operation (`OpFn`)
//!
//! [`OpFn`] wraps a closure `F: Fn(I, CancellationToken) -> Fut`, producing a fresh
//! future per attempt. No state is shared between attempts unless the closure
//! captures it explicitly (e.g. through an `Arc<...>`).
//!
//! ## Example
//! ```rust
//! use tokio_util::sync::CancellationToken;
//! use opvisor::{OpFn, OpRef};
//!
//! let op: OpRef<u32, u32, String> = OpFn::arc(|n: u32, _ctx: CancellationToken| async move {
//!     if n == 0 { return Err("zero".to_string()); }
//!     Ok(n * 2)
//! });
//! ```

use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::operation::{BoxOpFuture, Operation};

/// Function-backed operation implementation.
#[derive(Debug)]
pub struct OpFn<F> {
    f: F,
}

impl<F> OpFn<F> {
    /// Creates a new function-backed operation.
    ///
    /// Prefer [`OpFn::arc`] when you immediately need an [`OpRef`](super::OpRef).
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the operation and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<F, Fut, I, V, E> Operation<I, V, E> for OpFn<F>
where
    F: Fn(I, CancellationToken) -> Fut + Send + Sync + 'static, // Fn, not FnMut
    Fut: Future<Output = Result<V, E>> + Send + 'static,
{
    fn call(&self, input: I, ctx: CancellationToken) -> BoxOpFuture<V, E> {
        Box::pin((self.f)(input, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::OpRef;

    #[tokio::test]
    async fn test_each_call_gets_its_own_input() {
        let op: OpRef<u32, u32, String> =
            OpFn::arc(|n: u32, _ctx: CancellationToken| async move { Ok::<_, String>(n + 1) });

        assert_eq!(op.call(1, CancellationToken::new()).await, Ok(2));
        assert_eq!(op.call(41, CancellationToken::new()).await, Ok(42));
    }

    #[tokio::test]
    async fn test_token_is_visible_to_operation() {
        let op: OpRef<(), bool, String> =
            OpFn::arc(|_: (), ctx: CancellationToken| async move { Ok::<_, String>(ctx.is_cancelled()) });

        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(op.call((), token).await, Ok(true));
    }
}
