//! Error types for the chord runtime.
//!
//! Errors raised by user transforms and handlers travel as [`anyhow::Error`];
//! the types here cover what the runtime itself can report.

use thiserror::Error;

/// The main error type for chord operations.
#[derive(Debug, Error)]
pub enum ChordError {
    /// A terminal success handler returned an error and the run was aborted.
    #[error("Success handler failed: {source}")]
    Handler {
        /// The error returned by the handler.
        #[source]
        source: anyhow::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A trigger could not bind its listener.
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// The address that was requested.
        address: String,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The global logging subscriber could not be installed.
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ChordError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Why an [`ExecutionContext`](crate::context::ExecutionContext) is done.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    /// The context, or one of its ancestors, was cancelled.
    #[error("Context cancelled: {reason}")]
    Cancelled {
        /// The first reason given.
        reason: String,
    },

    /// The context deadline passed.
    #[error("Context deadline exceeded")]
    DeadlineExceeded,
}

/// Returned when emitting into a sequence whose reader has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Sequence closed: the reader has gone away")]
pub struct SequenceClosed;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_keeps_source() {
        let err = ChordError::Handler {
            source: anyhow::anyhow!("disk full"),
        };
        assert_eq!(err.to_string(), "Success handler failed: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_context_error_display() {
        let err = ContextError::Cancelled {
            reason: "shutdown".into(),
        };
        assert_eq!(err.to_string(), "Context cancelled: shutdown");
        assert_eq!(
            ContextError::DeadlineExceeded.to_string(),
            "Context deadline exceeded"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "taken");
        let err: ChordError = io.into();
        assert!(matches!(err, ChordError::Io(_)));
        assert!(err.to_string().contains("taken"));
    }
}
