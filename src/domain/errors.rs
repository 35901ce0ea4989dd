//! Domain errors for the orchestration core.

use thiserror::Error;

/// Classification of an error for protocol mapping and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, unknown enum value, missing required field.
    Validation,
    /// Entity exists but is in an incompatible state for the operation.
    Conflict,
    /// Entity id unknown.
    NotFound,
    /// Retryable infrastructure failure (busy database, spawn race).
    Transient,
    /// Unrecoverable failure; the server should begin controlled shutdown.
    Fatal,
}

impl ErrorKind {
    /// Numeric error code carried on the tool protocol.
    pub const fn code(self) -> i32 {
        match self {
            Self::Validation => -32602,
            Self::NotFound => -32001,
            Self::Conflict => -32002,
            Self::Transient => -32003,
            Self::Fatal => -32603,
        }
    }
}

/// Errors raised by the orchestration domain.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Assignment not found: {0}")]
    AssignmentNotFound(String),

    #[error("Review board not found: {0}")]
    BoardNotFound(String),

    #[error("Stop request not found: {0}")]
    StopRequestNotFound(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidStatusTransition { from: String, to: String },

    #[error("Duplicate vote by {reviewer_id} on board {board_id}")]
    DuplicateVote { board_id: String, reviewer_id: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Database busy: {0}")]
    DatabaseBusy(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Fatal: {0}")]
    Fatal(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Classify this error for protocol codes and retry decisions.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AgentNotFound(_)
            | Self::TaskNotFound(_)
            | Self::AssignmentNotFound(_)
            | Self::BoardNotFound(_)
            | Self::StopRequestNotFound(_) => ErrorKind::NotFound,
            Self::InvalidStatusTransition { .. }
            | Self::DuplicateVote { .. }
            | Self::Conflict(_) => ErrorKind::Conflict,
            Self::ValidationFailed(_) | Self::SerializationError(_) => ErrorKind::Validation,
            Self::DatabaseBusy(_) => ErrorKind::Transient,
            Self::DatabaseError(_) => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true if the operation may succeed when retried.
    pub const fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.message().contains("locked") || db.message().contains("busy") => {
                DomainError::DatabaseBusy(err.to_string())
            }
            _ => DomainError::DatabaseError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
