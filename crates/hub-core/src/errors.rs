//! Cross-cutting error taxonomy for the data hub.
//!
//! Storage-level errors (`DatabaseError`) and configuration errors
//! (`ConfigError`) live in their own crates and convert into `CoreError`
//! at the engine boundary. The binary converges everything into `anyhow`.

use thiserror::Error;

/// Errors that can be raised by any data-hub crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad configuration, name, or type. Raised before any side effect.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity lookup returned no result.
    #[error("Entity not found: {entity_type} {id}")]
    NotFound { entity_type: String, id: String },

    /// Duplicate name, or a relationship blocks the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A state machine transition was attempted that is not allowed.
    #[error("Invalid state transition: {entity_type} {id} from {from} to {to}")]
    InvalidTransition {
        entity_type: String,
        id: String,
        from: String,
        to: String,
    },

    /// One record failed one governance stage. Collected as an issue.
    #[error("{stage} stage failed for record {record_id}: {message}")]
    Stage {
        stage: String,
        record_id: String,
        message: String,
    },

    /// Another instance holds the execution lock.
    #[error("Lock '{key}' is held by another instance")]
    LockContention { key: String },

    /// The whole run must abort.
    #[error("Fatal execution error: {0}")]
    FatalExecution(String),

    /// The execution observed a stop request.
    #[error("Execution {execution_id} was cancelled")]
    Cancelled { execution_id: String },

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    /// Shorthand for a `NotFound` error.
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    /// Errors that abort a run and mark the task failed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::FatalExecution(_) | Self::Other(_))
    }

    /// Errors that mean "do nothing this time" rather than "something broke".
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::LockContention { .. })
    }
}
