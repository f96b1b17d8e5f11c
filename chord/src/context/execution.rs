//! Hierarchical execution context threaded through every stage.

use crate::cancellation::CancellationToken;
use crate::errors::ContextError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// The context an event is produced and processed under.
///
/// Carries a cancellation signal, an optional deadline and request-scoped
/// values. Cloning is cheap; clones share the same signal. Derived contexts
/// (see [`child`](Self::child), [`with_timeout`](Self::with_timeout),
/// [`with_value`](Self::with_value)) are cancelled along with their parent.
#[derive(Clone)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    token: Arc<CancellationToken>,
    deadline: Option<Instant>,
    values: HashMap<String, serde_json::Value>,
    parent: Option<ExecutionContext>,
}

impl ExecutionContext {
    /// Creates a root context that is never cancelled on its own.
    #[must_use]
    pub fn background() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                token: Arc::new(CancellationToken::new()),
                deadline: None,
                values: HashMap::new(),
                parent: None,
            }),
        }
    }

    fn derive(&self, deadline: Option<Instant>, values: HashMap<String, serde_json::Value>) -> Self {
        let deadline = match (self.inner.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            inner: Arc::new(ContextInner {
                token: self.inner.token.child(),
                deadline,
                values,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Derives a context that can be cancelled independently of `self`.
    #[must_use]
    pub fn child(&self) -> Self {
        self.derive(None, HashMap::new())
    }

    /// Derives a context that is done at `deadline` at the latest.
    ///
    /// A parent deadline that is earlier still applies.
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        self.derive(Some(deadline), HashMap::new())
    }

    /// Derives a context that is done after `timeout`.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context carrying an additional request-scoped value.
    #[must_use]
    pub fn with_value(&self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        let mut values = HashMap::with_capacity(1);
        values.insert(key.into(), value.into());
        self.derive(None, values)
    }

    /// Looks up a request-scoped value, nearest context first.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<&serde_json::Value> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(v) = ctx.inner.values.get(key) {
                return Some(v);
            }
            current = ctx.inner.parent.as_ref();
        }
        None
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self, reason: impl Into<String>) {
        self.inner.token.cancel(reason);
    }

    /// Returns the deadline, if any.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Returns true once the context is cancelled or past its deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.token.is_cancelled() || self.deadline_passed()
    }

    /// Returns why the context is done, or `None` while it is live.
    #[must_use]
    pub fn err(&self) -> Option<ContextError> {
        if self.inner.token.is_cancelled() {
            let reason = self.inner.token.reason().unwrap_or_default();
            return Some(ContextError::Cancelled { reason });
        }
        self.deadline_passed().then_some(ContextError::DeadlineExceeded)
    }

    /// Waits until the context is cancelled or its deadline passes.
    pub async fn cancelled(&self) {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    () = self.inner.token.cancelled() => {}
                    () = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }
    }

    /// Owned variant of [`cancelled`](Self::cancelled), for APIs that need a
    /// `'static` shutdown future.
    pub fn cancelled_owned(self) -> impl std::future::Future<Output = ()> + Send + 'static {
        async move { self.cancelled().await }
    }

    fn deadline_passed(&self) -> bool {
        self.inner.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cancelled", &self.is_cancelled())
            .field("deadline", &self.inner.deadline)
            .field("values", &self.inner.values)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dropped_derivations_leave_root_flat() {
        let root = ExecutionContext::background();
        for n in 0..1_000 {
            let event = root.with_value("event", n).with_timeout(Duration::from_secs(5));
            assert_eq!(event.value("event"), Some(&json!(n)));
        }
        assert_eq!(root.inner.token.registered_callbacks(), 0);

        let live = root.child();
        assert_eq!(root.inner.token.registered_callbacks(), 1);
        drop(live);
        assert_eq!(root.inner.token.registered_callbacks(), 0);
    }

    #[test]
    fn test_background_is_live() {
        let ctx = ExecutionContext::background();
        assert!(!ctx.is_cancelled());
        assert!(ctx.err().is_none());
        assert!(ctx.deadline().is_none());
    }

    #[test]
    fn test_cancel_propagates_downward_only() {
        let root = ExecutionContext::background();
        let child = root.child();
        let grandchild = child.with_value("k", 1);

        child.cancel("stop");
        assert!(!root.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert_eq!(
            grandchild.err(),
            Some(ContextError::Cancelled {
                reason: "stop".into()
            })
        );
    }

    #[test]
    fn test_values_nearest_wins() {
        let ctx = ExecutionContext::background()
            .with_value("tenant", "acme")
            .with_value("request", 7)
            .with_value("tenant", "globex");

        assert_eq!(ctx.value("tenant"), Some(&json!("globex")));
        assert_eq!(ctx.value("request"), Some(&json!(7)));
        assert!(ctx.value("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_cancelled() {
        let ctx = ExecutionContext::background().with_timeout(Duration::from_millis(50));
        assert!(!ctx.is_cancelled());

        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_keeps_earlier_parent_deadline() {
        let parent = ExecutionContext::background().with_timeout(Duration::from_millis(10));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let start = Instant::now();
        child.cancelled().await;
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(10));
        assert!(waited < Duration::from_secs(1));
    }
}
