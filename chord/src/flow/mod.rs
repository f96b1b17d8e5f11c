//! Flows and the driver that runs them.
//!
//! A [`Flow`] describes a pipeline: how to extend the trigger's stage into a
//! chain of transforms, and what to do with each terminal success or failure.
//! [`run_flow`] starts the chain once and feeds its outcomes to the handlers,
//! one at a time, on the caller's task.

mod driver;

pub use driver::{run_flow, run_flow_with, HandlerErrorPolicy, RunOptions, RunSummary};

use crate::context::ExecutionContext;
use crate::stages::Stage;
use async_trait::async_trait;

/// A user-defined workflow.
///
/// Handlers are invoked sequentially in outcome order and never concurrently
/// with each other, so they may hold plain mutable state behind `&self`
/// without further coordination beyond interior mutability.
#[async_trait]
pub trait Flow<In, Out>: Send + Sync {
    /// Builds the transform chain on top of `input`.
    ///
    /// Should only compose stages; starting them is the driver's job.
    fn pipeline(&self, input: Stage<In>) -> Stage<Out>;

    /// Handles one terminal success.
    ///
    /// A returned error is not fed back into the pipeline; the driver applies
    /// its [`HandlerErrorPolicy`].
    async fn on_success(&self, ctx: &ExecutionContext, value: Out) -> anyhow::Result<()>;

    /// Handles one terminal failure.
    async fn on_error(&self, ctx: &ExecutionContext, error: anyhow::Error);
}
