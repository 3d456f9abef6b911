//! Container error types

use std::borrow::Cow;
use std::fmt;

use thiserror::Error;

/// Boxed error reported by application code through `add_error`
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Mutation entry point that was rejected
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    Emit,
    Add,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Emit => f.write_str("emit"),
            Operation::Add => f.write_str("add"),
        }
    }
}

/// Errors surfaced by cubits and blocs
///
/// Everything except [`BlocError::Spawn`] is delivered to the `on_error`
/// hook rather than returned, so producers never see a failure from
/// `emit` or `add`.
#[derive(Error, Debug)]
pub enum BlocError {
    /// `emit` or `add` was called after `close()`
    #[error("cannot {operation} on closed container `{name}`")]
    Closed {
        name: Cow<'static, str>,
        operation: Operation,
    },

    /// A dispatched event had no registered handler
    #[error("`{name}` has no handler registered for event kind {kind}")]
    UnhandledEvent {
        name: Cow<'static, str>,
        kind: String,
    },

    /// A handler panicked while processing an event
    #[error("handler for event kind {kind} in `{name}` panicked: {message}")]
    HandlerPanicked {
        name: Cow<'static, str>,
        kind: String,
        message: String,
    },

    /// Error reported by application code
    #[error("`{name}` reported an error: {source}")]
    Reported {
        name: Cow<'static, str>,
        #[source]
        source: BoxError,
    },

    /// The dispatcher thread could not be started
    #[error("failed to spawn dispatcher thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl BlocError {
    /// Whether this error is an expected, recoverable condition
    /// (post-close operation or unhandled event) rather than a failure.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BlocError::Closed { .. } | BlocError::UnhandledEvent { .. })
    }
}

/// Result type for container operations
pub type Result<T> = std::result::Result<T, BlocError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_message() {
        let err = BlocError::Closed {
            name: "counter".into(),
            operation: Operation::Emit,
        };
        assert_eq!(err.to_string(), "cannot emit on closed container `counter`");
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_reported_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err = BlocError::Reported {
            name: "uploads".into(),
            source: Box::new(io),
        };
        assert!(!err.is_recoverable());
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("disk full"));
    }
}
