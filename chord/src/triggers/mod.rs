//! Triggers adapt external event sources into the first stage of a pipeline.
//!
//! A trigger emits one success per external event, tagged with the context
//! it was started under. When that context is cancelled it stops, releases
//! its resource and only then closes its sequence.

mod config;
mod http;
mod timer;

pub use config::{HttpTriggerConfig, TimerConfig};
pub use http::{HttpContext, HttpTrigger, ResponseWriter};
pub use timer::TimerTrigger;

use crate::context::ExecutionContext;
use crate::stages::Stage;

/// An external event source.
pub trait Trigger<T>: Send + Sync {
    /// Returns the stage producing this trigger's events under `ctx`.
    ///
    /// Starting the returned stage hands the underlying resource to the
    /// production run.
    fn stage(&self, ctx: &ExecutionContext) -> Stage<T>;
}
