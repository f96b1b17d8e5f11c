//! # Chord
//!
//! Composable event pipelines driven by triggers.
//!
//! A pipeline is a chain of stages. Each stage reads outcomes from the stage
//! before it and hands new outcomes to the next one through a rendezvous
//! handoff, so a slow consumer holds back every producer upstream. Failed
//! outcomes skip the remaining transforms and arrive at the flow's error
//! handler.
//!
//! Chord provides:
//!
//! - **Triggers**: a periodic timer and an HTTP endpoint as event sources
//! - **Stages**: restartable factories composed with sync or async transforms
//! - **Execution contexts**: hierarchical cancellation, deadlines and values
//! - **Flows**: terminal success and error handlers driven by [`flow::run_flow`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use chord::prelude::*;
//!
//! let ctx = ExecutionContext::background();
//! let timer = TimerTrigger::new(Duration::from_secs(1))?;
//!
//! let flow = MyFlow::default();
//! run_flow(timer.stage(&ctx), &flow).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod context;
pub mod errors;
pub mod flow;
pub mod observability;
pub mod outcome;
pub mod sequence;
pub mod stages;
pub mod testing;
pub mod triggers;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::context::ExecutionContext;
    pub use crate::errors::{ChordError, ContextError, SequenceClosed};
    pub use crate::flow::{
        run_flow, run_flow_with, Flow, HandlerErrorPolicy, RunOptions, RunSummary,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::outcome::Outcome;
    pub use crate::sequence::{sequence, Emitter, Sequence};
    pub use crate::stages::Stage;
    pub use crate::triggers::{
        HttpContext, HttpTrigger, HttpTriggerConfig, ResponseWriter, TimerConfig,
        TimerTrigger, Trigger,
    };
}
