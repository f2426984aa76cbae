/// HTTP error mapping
///
/// Engine failures become a status code plus `{ error, message, current }`,
/// where `current` is the workflow state as it stood after the failure.

use super::extract::{ACTOR_ID_HEADER, ACTOR_ROLE_HEADER};
use crate::error::{EngineError, Failure};
use crate::workflow::WorkflowSummary;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// JSON error body: `{ "error": kind, "message": ..., "current": summary? }`
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: &'static str,
    message: String,
    current: Option<WorkflowSummary>,
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            error: "UNAUTHENTICATED",
            message: format!("missing {} or {} header", ACTOR_ID_HEADER, ACTOR_ROLE_HEADER),
            current: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: "BAD_REQUEST",
            message: message.into(),
            current: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

fn status_for(error: &EngineError) -> StatusCode {
    match error {
        EngineError::InvalidTransition { .. } | EngineError::ConcurrentVersionConflict { .. } => StatusCode::CONFLICT,
        EngineError::ThreadTooDeep { .. } | EngineError::ValidationFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::Forbidden { .. } => StatusCode::FORBIDDEN,
        EngineError::NotFound { .. } => StatusCode::NOT_FOUND,
        EngineError::Advisory(_) => StatusCode::BAD_GATEWAY,
        EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<Failure> for ApiError {
    fn from(failure: Failure) -> Self {
        let status = status_for(&failure.error);
        if status.is_server_error() {
            tracing::error!("❌ {}", failure.error);
        }
        Self {
            status,
            error: failure.kind(),
            message: failure.error.to_string(),
            current: failure.current,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
