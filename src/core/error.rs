//! Error taxonomy for the task engine.

use thiserror::Error;

/// Tagged error kind surfaced by the engine, carried as the enum variant
/// itself (not a string field) so callers can match on it directly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Null closure, out-of-range integer parameter, or unknown workload type.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Memory ceiling, pool caps, or backpressure hit.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Unknown task id.
    #[error("task not found: {0}")]
    NotFound(u64),

    /// Advisory timer elapsed before completion.
    #[error("task {0} timed out")]
    Timeout(u64),

    /// Task was cancelled before it ran.
    #[error("task {0} was cancelled")]
    Cancelled(u64),

    /// The closure itself failed; carries the closure's reported message.
    #[error("task failed: {0}")]
    UserError(String),

    /// Queue-post failure, id-space exhaustion, or a platform query failure
    /// that leaves state inconsistent.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// The taxonomy tag as a stable, lowercase, snake_case string — useful
    /// for hosts that marshal errors across an FFI/JS boundary.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::NotFound(_) => "not_found",
            Self::Timeout(_) => "timeout",
            Self::Cancelled(_) => "cancelled",
            Self::UserError(_) => "user_error",
            Self::Internal(_) => "internal",
        }
    }
}

/// Convenience alias for internal setup-time code (config assembly, system
/// probing) that doesn't need a stable tag and just wants `?`-propagation.
pub type AppResult<T> = Result<T, anyhow::Error>;
