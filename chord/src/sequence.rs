//! The cancellable sequence channel connecting adjacent stages.
//!
//! A sequence is a rendezvous handoff: [`Emitter::emit`] completes only once
//! the reader has taken the outcome, so a slow reader stalls its producer and
//! backpressure travels up the whole chain. The sequence ends when the
//! emitter is dropped.

use crate::errors::SequenceClosed;
use crate::outcome::Outcome;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Creates a connected emitter/sequence pair.
#[must_use]
pub fn sequence<T>() -> (Emitter<T>, Sequence<T>) {
    let (tx, rx) = mpsc::channel(1);
    (Emitter { tx }, Sequence { rx })
}

/// Write half of a sequence. Dropping it closes the sequence.
#[derive(Debug)]
pub struct Emitter<T> {
    tx: mpsc::Sender<Outcome<T>>,
}

impl<T> Emitter<T> {
    /// Hands one outcome to the reader, waiting until it has been taken.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceClosed`] if the reader is dropped before taking it.
    pub async fn emit(&self, outcome: Outcome<T>) -> Result<(), SequenceClosed> {
        let permit = self.tx.reserve().await.map_err(|_| SequenceClosed)?;
        permit.send(outcome);
        // The single slot frees up only once the reader has received.
        self.tx.reserve().await.map(drop).map_err(|_| SequenceClosed)
    }

    /// Resolves once the reader has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    /// Returns true if the reader has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half of a sequence.
#[derive(Debug)]
pub struct Sequence<T> {
    rx: mpsc::Receiver<Outcome<T>>,
}

impl<T> Sequence<T> {
    /// Waits for the next outcome. `None` means the producer has finished.
    pub async fn next(&mut self) -> Option<Outcome<T>> {
        self.rx.recv().await
    }

    /// Returns a sequence that is already closed.
    #[must_use]
    pub fn closed() -> Self {
        let (_, seq) = sequence();
        seq
    }
}

impl<T> Stream for Sequence<T> {
    type Item = Outcome<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
