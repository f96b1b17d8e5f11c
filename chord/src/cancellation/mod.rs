//! Cooperative cancellation.
//!
//! [`CancellationToken`] is the signal carried by every
//! [`ExecutionContext`](crate::context::ExecutionContext).

mod token;

pub use token::{CancelCallback, CancellationToken};
