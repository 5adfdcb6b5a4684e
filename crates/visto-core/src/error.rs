// Error types for the approval workflow engine

use thiserror::Error;
use uuid::Uuid;

use crate::validator::Violation;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, VistoError>;

/// Errors that can occur across the workflow engine and gateway
#[derive(Debug, Error)]
pub enum VistoError {
    /// Structurally invalid definition, rejected at publish time
    #[error("definition validation failed: {0:?}")]
    Validation(Vec<Violation>),

    /// Malformed input rejected at the gateway boundary
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A non-terminal instance already exists for the entity
    #[error("conflict: {0}")]
    Conflict(String),

    /// Missing definition or instance
    #[error("not found: {0}")]
    NotFound(String),

    /// Instance state/node precondition mismatch, including optimistic-concurrency loss
    #[error("state error: {0}")]
    State(String),

    /// Actor is not an eligible approver, or self-approval attempt
    #[error("authorization error: {0}")]
    Authorization(String),

    /// An accion node's side effect failed
    #[error("action execution failed: {0}")]
    ActionExecution(String),

    /// Fatal engine error (runtime cycle past the hop bound)
    #[error("engine error: {0}")]
    Engine(String),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] anyhow::Error),
}

impl VistoError {
    /// Create an invalid input error
    pub fn invalid(msg: impl Into<String>) -> Self {
        VistoError::InvalidInput(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        VistoError::Conflict(msg.into())
    }

    /// Create a state error
    pub fn state(msg: impl Into<String>) -> Self {
        VistoError::State(msg.into())
    }

    /// Create an authorization error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        VistoError::Authorization(msg.into())
    }

    /// Create a not-found error for an instance
    pub fn instance_not_found(id: Uuid) -> Self {
        VistoError::NotFound(format!("instance {id} not found"))
    }

    /// Create a not-found error for a definition
    pub fn definition_not_found(entity_type: &str) -> Self {
        VistoError::NotFound(format!(
            "no published definition for entity type '{entity_type}'"
        ))
    }
}
