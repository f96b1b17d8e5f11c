//! Execution context threaded through triggers, stages and handlers.
//!
//! Every [`Outcome`](crate::outcome::Outcome) carries the context it was
//! produced under, so handlers see the cancellation state, deadline and
//! request-scoped values that were active for that event.

mod execution;

pub use execution::ExecutionContext;
