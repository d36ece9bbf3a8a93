//! Error taxonomy for the remediation engine.

use thiserror::Error;

/// Errors surfaced by engine operations.
///
/// Lock contention and per-action execution failures are not represented
/// here: they are absorbed into dispatch outcomes and attempt records.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No tracked alert exists for the fingerprint.
    #[error("alert not found: {0}")]
    NotFound(String),

    /// A lifecycle transition that the state machine forbids.
    #[error("invalid transition for alert {fingerprint}: {from} -> {to}")]
    InvalidTransition {
        /// Alert fingerprint.
        fingerprint: String,
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// The coordination store failed. Fatal to the dispatch invocation;
    /// the caller (webhook layer) must retry.
    #[error("state store error: {0}")]
    Store(String),

    /// The executor adapter failed outside a per-action attempt (e.g.
    /// client construction at startup). Per-action failures are recorded
    /// as attempt data instead.
    #[error("executor error: {0}")]
    Executor(String),

    /// Handler mapping files could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<crate::executor::ExecutorError> for EngineError {
    fn from(err: crate::executor::ExecutorError) -> Self {
        Self::Executor(err.to_string())
    }
}

impl From<redis::RedisError> for EngineError {
    fn from(err: redis::RedisError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Store(format!("serialization failed: {err}"))
    }
}

/// Convenience alias for engine results.
pub type Result<T> = std::result::Result<T, EngineError>;
