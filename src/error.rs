/// Error taxonomy for the workflow engine
///
/// Every component raises one of these narrow kinds. The facade never
/// reinterprets them; it wraps them in [`Failure`] together with the
/// authoritative workflow state so callers can reconcile in one round trip.

use crate::access::UserId;
use crate::workflow::types::{Operation, WorkflowId, WorkflowState, WorkflowSummary};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Kind of record a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Entity {
    Workflow,
    Version,
    Review,
    Comment,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Entity::Workflow => "workflow",
            Entity::Version => "version",
            Entity::Review => "review",
            Entity::Comment => "comment",
        })
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    /// Operation is not valid from the current state. Re-read and pick a valid step.
    #[error("cannot {operation} while workflow is {current}")]
    InvalidTransition {
        current: WorkflowState,
        operation: Operation,
    },

    /// Optimistic lock lost. Retry with a fresh read.
    #[error("workflow {workflow_id} was modified concurrently (version {attempted} already claimed)")]
    ConcurrentVersionConflict {
        workflow_id: WorkflowId,
        attempted: u32,
    },

    #[error("comment threads are limited to {max_depth} levels")]
    ThreadTooDeep { max_depth: usize },

    #[error("{actor} is not allowed to {operation}")]
    Forbidden { actor: UserId, operation: Operation },

    #[error("{entity} {id} not found")]
    NotFound { entity: Entity, id: String },

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("advisory service failed: {0}")]
    Advisory(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

impl EngineError {
    pub fn not_found(entity: Entity, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::ValidationFailed(message.into())
    }

    /// Stable machine-readable code
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidTransition { .. } => "INVALID_TRANSITION",
            EngineError::ConcurrentVersionConflict { .. } => "CONCURRENT_VERSION_CONFLICT",
            EngineError::ThreadTooDeep { .. } => "THREAD_TOO_DEEP",
            EngineError::Forbidden { .. } => "FORBIDDEN",
            EngineError::NotFound { .. } => "NOT_FOUND",
            EngineError::ValidationFailed(_) => "VALIDATION_FAILED",
            EngineError::Advisory(_) => "ADVISORY_FAILED",
            EngineError::Storage(_) => "STORAGE_FAILED",
        }
    }

    /// Only an optimistic-lock loss can succeed by re-issuing the same intent
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::ConcurrentVersionConflict { .. })
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        EngineError::Storage(anyhow::Error::new(e))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Storage(anyhow::Error::new(e))
    }
}

/// A failed facade call: the underlying error plus the workflow state as it
/// stands after the failure (when the caller may see it)
#[derive(Debug, Error)]
#[error("{error}")]
pub struct Failure {
    #[source]
    pub error: EngineError,
    pub current: Option<WorkflowSummary>,
}

impl Failure {
    pub fn kind(&self) -> &'static str {
        self.error.kind()
    }
}

impl From<EngineError> for Failure {
    fn from(error: EngineError) -> Self {
        Failure {
            error,
            current: None,
        }
    }
}
