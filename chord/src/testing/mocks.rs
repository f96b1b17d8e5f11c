//! Mock flows and transforms for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::ExecutionContext;
use crate::flow::Flow;
use crate::stages::Stage;

/// A terminal outcome as seen by [`RecordingFlow`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded<Out> {
    /// Passed to `on_success`.
    Success(Out),
    /// Passed to `on_error`, as its message.
    Failure(String),
}

type PipelineFn<In, Out> = dyn Fn(Stage<In>) -> Stage<Out> + Send + Sync;
type RejectFn<Out> = dyn Fn(&Out) -> Option<anyhow::Error> + Send + Sync;

/// A flow that records every terminal outcome.
///
/// Also detects overlapping handler invocations, which the driver must
/// never produce.
pub struct RecordingFlow<In, Out> {
    pipeline: Box<PipelineFn<In, Out>>,
    records: Mutex<Vec<Recorded<Out>>>,
    handler_delay: Option<Duration>,
    reject: Option<Box<RejectFn<Out>>>,
    in_handler: AtomicBool,
    overlapped: AtomicBool,
    _input: PhantomData<fn(In)>,
}

impl<In, Out> RecordingFlow<In, Out> {
    /// Creates a recording flow with the given pipeline builder.
    pub fn new<P>(pipeline: P) -> Self
    where
        P: Fn(Stage<In>) -> Stage<Out> + Send + Sync + 'static,
    {
        Self {
            pipeline: Box::new(pipeline),
            records: Mutex::new(Vec::new()),
            handler_delay: None,
            reject: None,
            in_handler: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
            _input: PhantomData,
        }
    }

    /// Makes every handler call sleep for `delay` before returning.
    #[must_use]
    pub fn with_handler_delay(mut self, delay: Duration) -> Self {
        self.handler_delay = Some(delay);
        self
    }

    /// Makes `on_success` fail, without recording, for matching values.
    #[must_use]
    pub fn fail_success_when<P>(mut self, predicate: P) -> Self
    where
        Out: Debug + 'static,
        P: Fn(&Out) -> bool + Send + Sync + 'static,
    {
        self.reject = Some(Box::new(move |value| {
            predicate(value).then(|| anyhow::anyhow!("rejected {value:?}"))
        }));
        self
    }

    /// Returns true if two handler calls ever overlapped.
    #[must_use]
    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    /// Returns the number of recorded outcomes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Returns the recorded failure messages.
    #[must_use]
    pub fn failures(&self) -> Vec<String> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Failure(msg) => Some(msg.clone()),
                Recorded::Success(_) => None,
            })
            .collect()
    }

    async fn enter(&self) {
        if self.in_handler.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.handler_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_handler.store(false, Ordering::SeqCst);
    }
}

impl<In, Out: Clone> RecordingFlow<In, Out> {
    /// Returns every recorded outcome in order.
    #[must_use]
    pub fn records(&self) -> Vec<Recorded<Out>> {
        self.records.lock().clone()
    }

    /// Returns the recorded success values.
    #[must_use]
    pub fn successes(&self) -> Vec<Out> {
        self.records
            .lock()
            .iter()
            .filter_map(|r| match r {
                Recorded::Success(v) => Some(v.clone()),
                Recorded::Failure(_) => None,
            })
            .collect()
    }
}

#[async_trait]
impl<In, Out> Flow<In, Out> for RecordingFlow<In, Out>
where
    In: Send + 'static,
    Out: Send + 'static,
{
    fn pipeline(&self, input: Stage<In>) -> Stage<Out> {
        (self.pipeline)(input)
    }

    async fn on_success(&self, _ctx: &ExecutionContext, value: Out) -> anyhow::Result<()> {
        self.enter().await;
        let rejected = self.reject.as_ref().and_then(|reject| reject(&value));
        if rejected.is_none() {
            self.records.lock().push(Recorded::Success(value));
        }
        self.leave();
        rejected.map_or(Ok(()), Err)
    }

    async fn on_error(&self, _ctx: &ExecutionContext, error: anyhow::Error) {
        self.enter().await;
        self.records.lock().push(Recorded::Failure(error.to_string()));
        self.leave();
    }
}

/// Records the inputs a transform is invoked with.
#[derive(Debug, Clone, Default)]
pub struct TransformProbe {
    calls: Arc<Mutex<Vec<String>>>,
}

impl TransformProbe {
    /// Creates an empty probe.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A pass-through transform that records its input.
    pub fn identity<T>(&self) -> impl Fn(&ExecutionContext, T) -> anyhow::Result<T> + Send + Sync + 'static
    where
        T: Debug + 'static,
    {
        let calls = Arc::clone(&self.calls);
        move |_, value| {
            calls.lock().push(format!("{value:?}"));
            Ok(value)
        }
    }

    /// Returns the recorded inputs, formatted with `Debug`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns the number of invocations.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recording_flow_records_in_order() {
        let flow: RecordingFlow<u8, u8> = RecordingFlow::new(|s| s);
        let ctx = ExecutionContext::background();

        flow.on_success(&ctx, 1).await.expect("accepted");
        flow.on_error(&ctx, anyhow::anyhow!("bad")).await;

        assert_eq!(
            flow.records(),
            vec![Recorded::Success(1), Recorded::Failure("bad".into())]
        );
        assert_eq!(flow.failures(), vec!["bad".to_string()]);
        assert!(!flow.overlapped());
    }

    #[tokio::test]
    async fn test_reject_skips_recording() {
        let flow: RecordingFlow<u8, u8> = RecordingFlow::new(|s| s).fail_success_when(|v| *v > 1);
        let ctx = ExecutionContext::background();

        assert!(flow.on_success(&ctx, 1).await.is_ok());
        let err = flow.on_success(&ctx, 2).await.expect_err("rejected");
        assert_eq!(err.to_string(), "rejected 2");
        assert_eq!(flow.successes(), vec![1]);
    }

    #[test]
    fn test_probe_records_inputs() {
        let probe = TransformProbe::new();
        let transform = probe.identity::<&str>();
        let ctx = ExecutionContext::background();

        assert_eq!(transform(&ctx, "a").expect("identity"), "a");
        assert_eq!(probe.calls(), vec!["\"a\"".to_string()]);
        assert_eq!(probe.call_count(), 1);
    }
}
