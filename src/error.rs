//! Crate-local error type.

use std::time::Duration;

/// Unified failure type for the scoped context runtime.
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    /// A key was read with `get` but has neither an active binding nor a default.
    #[error("context key `{key_name}` is not bound and has no default")]
    Unbound {
        /// Debug name of the key that was read.
        key_name: String,
    },

    /// A structured scope operation was issued while the scope was in the wrong state.
    #[error("invalid scope state: expected {expected}, was {actual}")]
    InvalidScopeState {
        /// State the operation required.
        expected: &'static str,
        /// State the scope was actually in.
        actual: &'static str,
    },

    /// A bulk operation or `join` deadline elapsed before completion.
    #[error("operation timed out after {duration:?}")]
    Timeout {
        /// The configured deadline.
        duration: Duration,
    },

    /// A child task of a structured scope failed.
    #[error("child task failed: {cause}")]
    ExecutionFailure {
        /// The underlying failure.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The current task observed cooperative cancellation.
    #[error("operation was cancelled")]
    Interrupted,

    /// A transmitter failed during capture, replay, or restore.
    #[error("transmitter `{name}` failed: {cause}")]
    TransmitterFailure {
        /// Name of the failing transmitter.
        name: String,
        /// The underlying failure.
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Convenience alias used throughout the crate.
pub type ScopeResult<T> = Result<T, ScopeError>;
