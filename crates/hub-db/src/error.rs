//! Database error types for hub-db.

use hub_core::errors::CoreError;
use thiserror::Error;

/// Errors from database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// A SQL query failed, or a stored value could not be decoded.
    #[error("Query failed: {0}")]
    Query(String),

    /// Schema migration failed.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// Expected a result row but none was returned.
    #[error("No result returned")]
    NoResult,

    /// Lookup by id found nothing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Duplicate name, or a relationship blocks the operation.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Invalid state encountered (e.g., a disallowed status transition).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Underlying libSQL error.
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Catch-all for unexpected errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl DatabaseError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn json(e: &serde_json::Error) -> Self {
        Self::Query(format!("Invalid JSON: {e}"))
    }

    /// Map a UNIQUE constraint failure to `Conflict`.
    pub(crate) fn unique_or(e: libsql::Error, what: impl FnOnce() -> String) -> Self {
        if e.to_string().contains("UNIQUE constraint failed") {
            Self::Conflict(what())
        } else {
            Self::LibSql(e)
        }
    }
}

impl From<DatabaseError> for CoreError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::NotFound { entity, id } => Self::not_found(entity, id),
            DatabaseError::Conflict(msg) => Self::Conflict(msg),
            DatabaseError::InvalidState(msg) => Self::Validation(msg),
            other => Self::Other(anyhow::Error::new(other)),
        }
    }
}
