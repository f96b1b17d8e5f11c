//! The per-item result flowing through a pipeline.

use crate::context::ExecutionContext;

/// A success or a failure, tagged with the context it was produced under.
///
/// Successes and failures share one stream so their relative order is kept
/// without extra synchronization. Once a failure is created it is carried
/// unchanged to the end of the chain.
#[derive(Debug)]
pub struct Outcome<T> {
    ctx: ExecutionContext,
    result: anyhow::Result<T>,
}

impl<T> Outcome<T> {
    /// Wraps a value produced under `ctx`.
    pub fn success(ctx: ExecutionContext, value: T) -> Self {
        Self {
            ctx,
            result: Ok(value),
        }
    }

    /// Wraps an error raised under `ctx`.
    pub fn failure(ctx: ExecutionContext, error: impl Into<anyhow::Error>) -> Self {
        Self {
            ctx,
            result: Err(error.into()),
        }
    }

    /// Builds an outcome from a transform result.
    pub fn from_result(ctx: ExecutionContext, result: anyhow::Result<T>) -> Self {
        Self { ctx, result }
    }

    /// Returns true for a success.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    /// Returns true for a failure.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.result.is_err()
    }

    /// The context the outcome was produced under.
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    /// The carried value, if this is a success.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    /// The carried error, if this is a failure.
    #[must_use]
    pub fn error(&self) -> Option<&anyhow::Error> {
        self.result.as_ref().err()
    }

    /// Discards the context and returns the result.
    pub fn into_result(self) -> anyhow::Result<T> {
        self.result
    }

    /// Splits the outcome into its context and result.
    pub fn into_parts(self) -> (ExecutionContext, anyhow::Result<T>) {
        (self.ctx, self.result)
    }

    /// Re-types a failure for the next stage. Successes are handed back.
    ///
    /// # Errors
    ///
    /// Returns the success value and its context when called on a success.
    pub fn forward_failure<U>(self) -> Result<Outcome<U>, (ExecutionContext, T)> {
        match self.result {
            Err(error) => Ok(Outcome {
                ctx: self.ctx,
                result: Err(error),
            }),
            Ok(value) => Err((self.ctx, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_carries_value_and_context() {
        let ctx = ExecutionContext::background().with_value("id", 3);
        let outcome = Outcome::success(ctx, 42);

        assert!(outcome.is_success());
        assert!(!outcome.is_failure());
        assert_eq!(outcome.value(), Some(&42));
        assert!(outcome.error().is_none());
        assert_eq!(outcome.context().value("id"), Some(&serde_json::json!(3)));
    }

    #[test]
    fn test_failure_carries_error() {
        let outcome: Outcome<i32> =
            Outcome::failure(ExecutionContext::background(), anyhow::anyhow!("boom"));

        assert!(outcome.is_failure());
        assert!(outcome.value().is_none());
        assert_eq!(outcome.error().map(ToString::to_string), Some("boom".into()));
    }

    #[test]
    fn test_forward_failure_keeps_error_identity() {
        #[derive(Debug, thiserror::Error)]
        #[error("typed")]
        struct Typed;

        let outcome: Outcome<i32> = Outcome::failure(ExecutionContext::background(), Typed);
        let forwarded: Outcome<String> = outcome
            .forward_failure()
            .expect("failure should forward");

        let err = forwarded.into_result().expect_err("still a failure");
        assert!(err.downcast_ref::<Typed>().is_some());
    }

    #[test]
    fn test_forward_failure_returns_success() {
        let outcome = Outcome::success(ExecutionContext::background(), "v");
        let (_, value) = outcome
            .forward_failure::<u8>()
            .expect_err("success is handed back");
        assert_eq!(value, "v");
    }
}
