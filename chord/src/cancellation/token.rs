//! Cancellation token for cooperative cancellation.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn FnOnce() + Send + Sync>;

/// Where a child token is registered on its parent.
struct ParentLink {
    parent: Weak<CancellationToken>,
    id: u64,
}

/// A token for cooperative cancellation.
///
/// Cancellation is idempotent - only the first cancellation reason is kept.
/// Tokens form a tree: cancelling a token cancels every token derived from it
/// with [`CancellationToken::child`], never its parent. Dropping a child
/// removes its registration from the parent.
#[derive(Default)]
pub struct CancellationToken {
    /// Whether cancellation has been requested.
    cancelled: AtomicBool,
    /// The reason for cancellation (first one wins).
    reason: RwLock<Option<String>>,
    /// Callbacks to invoke on cancellation, in registration order.
    callbacks: RwLock<BTreeMap<u64, CancelCallback>>,
    next_id: AtomicU64,
    /// Set on child tokens while registered with a live parent.
    parent: Mutex<Option<ParentLink>>,
    /// Wakes tasks parked in [`CancellationToken::cancelled`].
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a token that is cancelled whenever `self` is.
    ///
    /// The child inherits the parent's reason when cancelled through it.
    #[must_use]
    pub fn child(self: &Arc<Self>) -> Arc<Self> {
        let child = Arc::new(Self::new());
        let weak = Arc::downgrade(&child);
        let parent = Arc::downgrade(self);
        let registered = self.register(Box::new(move || {
            if let Some(child) = weak.upgrade() {
                let reason = parent
                    .upgrade()
                    .and_then(|p| p.reason())
                    .unwrap_or_else(|| "parent cancelled".to_string());
                child.cancel(reason);
            }
        }));
        if let Some(id) = registered {
            *child.parent.lock() = Some(ParentLink {
                parent: Arc::downgrade(self),
                id,
            });
        }
        child
    }

    /// Requests cancellation with a reason.
    ///
    /// This is idempotent - only the first reason is kept.
    /// Callbacks are invoked immediately. Panics in callbacks are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        *self.reason.write() = Some(reason.into());
        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.write());
        for callback in callbacks.into_values() {
            run_callback(callback);
        }
    }

    /// Registers a callback to be invoked on cancellation.
    ///
    /// If already cancelled, the callback is invoked immediately.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        self.register(Box::new(callback));
    }

    /// Stores `callback` and returns its id, or runs it right away and
    /// returns `None` if already cancelled.
    fn register(&self, callback: CancelCallback) -> Option<u64> {
        {
            let mut callbacks = self.callbacks.write();
            if !self.is_cancelled() {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                callbacks.insert(id, callback);
                return Some(id);
            }
        }
        run_callback(callback);
        None
    }

    #[cfg(test)]
    pub(crate) fn registered_callbacks(&self) -> usize {
        self.callbacks.read().len()
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Waits until cancellation is requested.
    ///
    /// Returns immediately if the token is already cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: CancelCallback) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback)) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl Drop for CancellationToken {
    fn drop(&mut self) {
        let Some(link) = self.parent.get_mut().take() else {
            return;
        };
        if let Some(parent) = link.parent.upgrade() {
            parent.callbacks.write().remove(&link.id);
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_token_default_not_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_token_cancel_idempotent() {
        let token = CancellationToken::new();
        token.cancel("First reason");
        token.cancel("Second reason");

        assert!(token.is_cancelled());
        assert_eq!(token.reason(), Some("First reason".to_string()));
    }

    #[test]
    fn test_on_cancel_before_and_after_cancellation() {
        let token = CancellationToken::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = counter.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        token.cancel("test");
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let c = counter.clone();
        token.on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_panic_suppressed() {
        let token = CancellationToken::new();
        token.on_cancel(|| panic!("Intentional panic"));

        token.cancel("test");
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_child_follows_parent_not_reverse() {
        let parent = Arc::new(CancellationToken::new());
        let child = parent.child();
        let grandchild = child.child();

        child.cancel("child only");
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(grandchild.reason(), Some("child only".to_string()));

        let other = parent.child();
        parent.cancel("shutdown");
        assert!(other.is_cancelled());
        assert_eq!(other.reason(), Some("shutdown".to_string()));
    }

    #[test]
    fn test_dropped_children_release_registration() {
        let root = Arc::new(CancellationToken::new());
        for _ in 0..10_000 {
            drop(root.child());
        }
        assert_eq!(root.registered_callbacks(), 0);

        let kept = root.child();
        let dropped = root.child();
        drop(dropped);
        assert_eq!(root.registered_callbacks(), 1);

        root.cancel("shutdown");
        assert!(kept.is_cancelled());
        assert_eq!(root.registered_callbacks(), 0);
    }

    #[test]
    fn test_child_of_cancelled_parent_is_unregistered() {
        let root = Arc::new(CancellationToken::new());
        root.cancel("early");

        let child = root.child();
        assert!(child.is_cancelled());
        assert_eq!(child.reason(), Some("early".to_string()));
        assert_eq!(root.registered_callbacks(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiter() {
        let token = Arc::new(CancellationToken::new());
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(5)).await;
        token.cancel("done");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .expect("waiter should not panic");
    }
}
