//! Stages and their composition.
//!
//! A [`Stage`] is a restartable factory: every [`Stage::start`] spawns a new
//! production run and returns a fresh [`Sequence`]. Composing a stage with a
//! transform ([`Stage::new`], [`Stage::new_async`]) spawns one worker per
//! composed stage when the chain is started, so the stages of a chain work on
//! different items concurrently while each handles one item at a time.
//!
//! Failures take the railway: a failed outcome read from upstream is forwarded
//! unchanged and the transform is not invoked for it.
//!
//! Starting a stage requires a running tokio runtime.

use crate::context::ExecutionContext;
use crate::outcome::Outcome;
use crate::sequence::{sequence, Emitter, Sequence};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error, trace};

type Produce<T> = dyn Fn() -> Sequence<T> + Send + Sync;

/// A restartable factory for a lazily started sequence of outcomes.
pub struct Stage<T> {
    produce: Arc<Produce<T>>,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            produce: Arc::clone(&self.produce),
        }
    }
}

impl<T> std::fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Stage<T> {
    /// Wraps a production function.
    ///
    /// `produce` is called once per [`start`](Self::start) and must return
    /// the reading end of a freshly started run.
    pub fn from_fn<F>(produce: F) -> Self
    where
        F: Fn() -> Sequence<T> + Send + Sync + 'static,
    {
        Self {
            produce: Arc::new(produce),
        }
    }

    /// Wraps a producer task. Each start spawns `run` with a new emitter; the
    /// sequence closes when `run` returns.
    pub fn spawn_with<F, Fut>(run: F) -> Self
    where
        F: Fn(Emitter<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::from_fn(move || {
            let (tx, seq) = sequence();
            let producer = AssertUnwindSafe(run(tx)).catch_unwind();
            tokio::spawn(async move {
                if let Err(payload) = producer.await {
                    error!(panic = %panic_message(&*payload), "stage producer panicked");
                }
            });
            seq
        })
    }

    /// A finite source emitting each item as a success tagged with `ctx`.
    ///
    /// Stops early if `ctx` is cancelled.
    pub fn from_items<I>(ctx: &ExecutionContext, items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Clone + Send + Sync + 'static,
    {
        let ctx = ctx.clone();
        let items = items.into_iter();
        Self::spawn_with(move |tx| {
            let ctx = ctx.clone();
            let items = items.clone();
            async move {
                for item in items {
                    if ctx.is_cancelled() {
                        break;
                    }
                    tokio::select! {
                        () = ctx.cancelled() => break,
                        sent = tx.emit(Outcome::success(ctx.clone(), item)) => {
                            if sent.is_err() {
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    /// A source replaying prepared outcomes, failures included.
    ///
    /// Outcomes are moved out on the first start; later starts yield an
    /// empty sequence.
    pub fn from_outcomes<I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = Outcome<T>>,
    {
        let pending = Arc::new(Mutex::new(Some(outcomes.into_iter().collect::<Vec<_>>())));
        Self::spawn_with(move |tx| {
            let batch = pending.lock().take();
            async move {
                let Some(batch) = batch else {
                    debug!("outcomes already replayed");
                    return;
                };
                for outcome in batch {
                    if tx.emit(outcome).await.is_err() {
                        break;
                    }
                }
            }
        })
    }

    /// Starts a new production run.
    #[must_use]
    pub fn start(&self) -> Sequence<T> {
        (self.produce)()
    }

    /// Composes `upstream` with a synchronous transform.
    ///
    /// The transform runs on the stage's worker task; blocking in it stalls
    /// this stage and, through backpressure, everything upstream.
    pub fn new<In, F>(upstream: Stage<In>, transform: F) -> Self
    where
        In: Send + 'static,
        F: Fn(&ExecutionContext, In) -> anyhow::Result<T> + Send + Sync + 'static,
    {
        let transform = Arc::new(transform);
        Self::from_fn(move || {
            let transform = Arc::clone(&transform);
            relay(upstream.start(), move |ctx, value| {
                let result = transform(&ctx, value);
                std::future::ready(Outcome::from_result(ctx, result))
            })
        })
    }

    /// Composes `upstream` with an asynchronous transform.
    pub fn new_async<In, F, Fut>(upstream: Stage<In>, transform: F) -> Self
    where
        In: Send + 'static,
        F: Fn(ExecutionContext, In) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let transform = Arc::new(transform);
        Self::from_fn(move || {
            let transform = Arc::clone(&transform);
            relay(upstream.start(), move |ctx, value| {
                let fut = transform(ctx.clone(), value);
                async move { Outcome::from_result(ctx, fut.await) }
            })
        })
    }

    /// Method form of [`Stage::new`].
    pub fn then<Out, F>(self, transform: F) -> Stage<Out>
    where
        Out: Send + 'static,
        F: Fn(&ExecutionContext, T) -> anyhow::Result<Out> + Send + Sync + 'static,
    {
        Stage::new(self, transform)
    }

    /// Method form of [`Stage::new_async`].
    pub fn then_async<Out, F, Fut>(self, transform: F) -> Stage<Out>
    where
        Out: Send + 'static,
        F: Fn(ExecutionContext, T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Out>> + Send + 'static,
    {
        Stage::new_async(self, transform)
    }
}

/// Spawns the worker for one composed stage.
fn relay<In, Out, F, Fut>(mut upstream: Sequence<In>, step: F) -> Sequence<Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(ExecutionContext, In) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Outcome<Out>> + Send + 'static,
{
    let (tx, seq) = sequence();
    tokio::spawn(async move {
        while let Some(outcome) = upstream.next().await {
            let next = match outcome.forward_failure() {
                Ok(failed) => {
                    trace!("forwarding failure past transform");
                    failed
                }
                Err((ctx, value)) => {
                    let fallback = ctx.clone();
                    match AssertUnwindSafe(async { step(ctx, value).await })
                        .catch_unwind()
                        .await
                    {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let message = panic_message(&*payload);
                            error!(panic = %message, "stage transform panicked");
                            Outcome::failure(
                                fallback,
                                anyhow::anyhow!("stage transform panicked: {message}"),
                            )
                        }
                    }
                }
            };
            if tx.emit(next).await.is_err() {
                debug!("downstream closed, stopping stage worker");
                return;
            }
        }
        trace!("upstream closed, closing stage");
    });
    seq
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
