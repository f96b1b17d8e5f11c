//! The driver loop feeding a pipeline's outcomes to a flow's handlers.

use super::Flow;
use crate::errors::ChordError;
use crate::stages::Stage;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// What the driver does when `on_success` returns an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerErrorPolicy {
    /// Stop the run and return the error to the caller.
    #[default]
    Abort,
    /// Log the error, count it and keep going.
    Continue,
}

/// Options for [`run_flow_with`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunOptions {
    /// Policy for errors returned by `on_success`.
    #[serde(default)]
    pub on_handler_error: HandlerErrorPolicy,
}

impl RunOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the handler error policy.
    #[must_use]
    pub fn with_handler_error_policy(mut self, policy: HandlerErrorPolicy) -> Self {
        self.on_handler_error = policy;
        self
    }
}

/// Counts from a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Outcomes passed to `on_success`.
    pub successes: u64,
    /// Outcomes passed to `on_error`.
    pub failures: u64,
    /// Errors returned by `on_success` that the run continued past.
    pub handler_errors: u64,
}

/// Runs `flow` over the events of `stage` with default options.
///
/// Completes once the trigger's sequence closes, which is usually driven by
/// cancelling the context the trigger was started with.
///
/// # Errors
///
/// Returns [`ChordError::Handler`] if `on_success` fails; see
/// [`HandlerErrorPolicy::Abort`].
pub async fn run_flow<In, Out, F>(stage: Stage<In>, flow: &F) -> Result<RunSummary, ChordError>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Flow<In, Out> + ?Sized,
{
    run_flow_with(stage, flow, RunOptions::default()).await
}

/// Runs `flow` over the events of `stage`.
///
/// The chain is started exactly once. Handlers run on the calling task, one
/// outcome at a time, so a slow handler holds back the whole chain.
///
/// # Errors
///
/// Returns [`ChordError::Handler`] if `on_success` fails under
/// [`HandlerErrorPolicy::Abort`]. The chain is dropped first, so upstream
/// workers stop at their next handoff.
pub async fn run_flow_with<In, Out, F>(
    stage: Stage<In>,
    flow: &F,
    options: RunOptions,
) -> Result<RunSummary, ChordError>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Flow<In, Out> + ?Sized,
{
    let run_id = Uuid::new_v4();
    let span = info_span!("run_flow", %run_id);

    async move {
        info!(policy = ?options.on_handler_error, "flow run started");
        let mut outcomes = flow.pipeline(stage).start();
        let mut summary = RunSummary::default();

        while let Some(outcome) = outcomes.next().await {
            let (ctx, result) = outcome.into_parts();
            match result {
                Ok(value) => {
                    summary.successes += 1;
                    let Err(e) = flow.on_success(&ctx, value).await else {
                        continue;
                    };
                    match options.on_handler_error {
                        HandlerErrorPolicy::Abort => {
                            error!(error = %e, "success handler failed, aborting run");
                            return Err(ChordError::Handler { source: e });
                        }
                        HandlerErrorPolicy::Continue => {
                            warn!(error = %e, "success handler failed, continuing");
                            summary.handler_errors += 1;
                        }
                    }
                }
                Err(e) => {
                    debug!(error = %e, "routing failure to error handler");
                    summary.failures += 1;
                    flow.on_error(&ctx, e).await;
                }
            }
        }

        info!(
            successes = summary.successes,
            failures = summary.failures,
            handler_errors = summary.handler_errors,
            "flow run finished"
        );
        Ok(summary)
    }
    .instrument(span)
    .await
}
