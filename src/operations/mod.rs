//! # Operation abstractions and bindings.
//!
//! This module provides the operation-related types:
//! - [`Operation`] - trait for async cancelable operations
//! - [`OpFn`] - function-backed operation implementation
//! - [`OpRef`] - shared reference to an operation (`Arc<dyn Operation>`)
//! - [`OperationBinding`] - key + policies + operation, as registered in the engine

mod binding;
mod op_fn;
mod operation;

pub use binding::OperationBinding;
pub use op_fn::OpFn;
pub use operation::{BoxOpFuture, OpRef, Operation};
