/// Workflow lifecycle REST API endpoints
///
/// Every handler extracts the calling [`Actor`] from the request headers and
/// delegates to one facade verb. Mutations answer with the workflow summary so
/// the caller can reconcile its view without another read.

use super::error::ApiError;
use crate::{
    access::{Actor, RolePolicy, UserId},
    facade::{ReviewReceipt, WorkflowFacade},
    workflow::{Recommendation, Review, Snapshot, Version, WorkflowId, WorkflowSummary},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

/// Application state shared by every route
#[derive(Clone)]
pub struct AppState {
    /// Single entry point for every verb
    pub facade: Arc<WorkflowFacade>,
    /// Same role table the facade checks against, kept for runtime replacement
    pub roles: Arc<RolePolicy>,
}

#[derive(Debug, Deserialize)]
pub struct InitializeRequest {
    pub assessment_id: String,
    #[serde(default)]
    pub snapshot: Snapshot,
}

#[derive(Debug, Deserialize)]
pub struct SaveDraftRequest {
    pub snapshot: Snapshot,
    pub change_summary: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub reviewer_ids: Vec<UserId>,
    /// Saved as a new version before submission when present
    pub snapshot: Option<Snapshot>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewersRequest {
    pub reviewer_ids: Vec<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewRequest {
    pub recommendation: Recommendation,
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RejectRequest {
    pub feedback: String,
}

/// Create workflow lifecycle routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(initialize))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}/draft", post(save_draft))
        .route("/api/workflows/{id}/submit", post(submit_for_review))
        .route("/api/workflows/{id}/reviewers", post(request_reviews))
        .route("/api/workflows/{id}/reviews", get(list_reviews).post(submit_review))
        .route("/api/workflows/{id}/approve", post(approve))
        .route("/api/workflows/{id}/reject", post(reject))
        .route("/api/workflows/{id}/resume", post(resume))
        .route("/api/workflows/{id}/amend", post(amend))
        .route("/api/workflows/{id}/archive", post(archive))
        .route("/api/workflows/{id}/versions", get(list_versions))
        .route("/api/workflows/{id}/versions/{number}", get(get_version))
        .route("/api/workflows/{id}/versions/{number}/restore", post(restore_version))
}

/// Initialize the workflow for an assessment (idempotent per assessment)
///
/// Answers 201 when this call created the workflow and 200 when it already existed.
///
/// POST /api/workflows
/// Body: { "assessment_id": "...", "snapshot": { "answers": {...}, "axis_scores": {...} } }
async fn initialize(
    State(state): State<AppState>,
    actor: Actor,
    Json(payload): Json<InitializeRequest>,
) -> Result<(StatusCode, Json<WorkflowSummary>), ApiError> {
    if payload.assessment_id.trim().is_empty() {
        return Err(ApiError::bad_request("assessment_id must not be blank"));
    }

    let (summary, created) = state
        .facade
        .open_or_initialize(&actor, payload.assessment_id.trim(), payload.snapshot)
        .await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(summary)))
}

async fn get_workflow(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.get_workflow(&actor, id).await?))
}

/// POST /api/workflows/{id}/draft
async fn save_draft(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<SaveDraftRequest>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    let summary = state
        .facade
        .save_draft(&actor, id, payload.snapshot, payload.change_summary)
        .await?;
    Ok(Json(summary))
}

/// POST /api/workflows/{id}/submit
/// Body: { "reviewer_ids": ["..."], "snapshot": {...}? }
async fn submit_for_review(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    let summary = state
        .facade
        .submit_for_review(&actor, id, payload.reviewer_ids, payload.snapshot)
        .await?;
    Ok(Json(summary))
}

/// POST /api/workflows/{id}/reviewers
async fn request_reviews(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<ReviewersRequest>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.request_reviews(&actor, id, payload.reviewer_ids).await?))
}

/// POST /api/workflows/{id}/reviews
/// Body: { "recommendation": "APPROVE" | "APPROVE_WITH_COMMENTS" | "REJECT", "comment": "..."? }
async fn submit_review(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<ReviewReceipt>, ApiError> {
    let receipt = state
        .facade
        .submit_review(&actor, id, payload.recommendation, payload.comment)
        .await?;
    Ok(Json(receipt))
}

async fn list_reviews(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<Vec<Review>>, ApiError> {
    Ok(Json(state.facade.list_reviews(&actor, id).await?))
}

async fn approve(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.approve(&actor, id).await?))
}

/// POST /api/workflows/{id}/reject
/// Body: { "feedback": "..." }
async fn reject(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<RejectRequest>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.reject(&actor, id, &payload.feedback).await?))
}

async fn resume(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.resume(&actor, id).await?))
}

async fn amend(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.amend(&actor, id).await?))
}

async fn archive(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.archive(&actor, id).await?))
}

async fn list_versions(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<Vec<Version>>, ApiError> {
    Ok(Json(state.facade.list_versions(&actor, id).await?))
}

async fn get_version(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, number)): Path<(WorkflowId, u32)>,
) -> Result<Json<Version>, ApiError> {
    Ok(Json(state.facade.get_version(&actor, id, number).await?))
}

/// Copy version `number` forward as a new version
///
/// POST /api/workflows/{id}/versions/{number}/restore
async fn restore_version(
    State(state): State<AppState>,
    actor: Actor,
    Path((id, number)): Path<(WorkflowId, u32)>,
) -> Result<Json<WorkflowSummary>, ApiError> {
    Ok(Json(state.facade.restore_version(&actor, id, number).await?))
}
