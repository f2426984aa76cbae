/// Collaboration endpoints: comments, presence, activity and advisory

use super::{error::ApiError, workflows::AppState};
use crate::{
    access::Actor,
    advisory::{Advice, AdviceKind},
    collab::{ActivityPage, PresenceEntry},
    workflow::{AxisComment, AxisId, CommentId, Cursor, ResolveOutcome, WorkflowId},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest a client may hold an activity long-poll open
pub const MAX_WAIT_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
pub struct CommentQuery {
    pub axis: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PostCommentRequest {
    pub axis_id: AxisId,
    pub parent_id: Option<CommentId>,
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub cascade: bool,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    #[serde(flatten)]
    pub outcome: ResolveOutcome,
    /// Set when open replies remain under the resolved comment
    pub warning: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActivityQuery {
    #[serde(default)]
    pub since: Cursor,
    pub limit: Option<usize>,
    #[serde(default)]
    pub wait_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct AdviceRequest {
    #[serde(default)]
    pub kind: AdviceKind,
    pub axis_id: Option<AxisId>,
}

pub fn create_collaboration_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/comments", get(list_comments).post(add_comment))
        .route("/api/comments/{id}/resolve", post(resolve_comment))
        .route(
            "/api/workflows/{id}/presence",
            get(list_active).post(heartbeat).delete(leave),
        )
        .route("/api/workflows/{id}/activity", get(list_activity))
        .route("/api/workflows/{id}/advice", post(advise))
}

/// GET /api/workflows/{id}/comments?axis=strategy
async fn list_comments(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Query(query): Query<CommentQuery>,
) -> Result<Json<Vec<AxisComment>>, ApiError> {
    let axis = query.axis.filter(|a| !a.trim().is_empty()).map(AxisId);
    Ok(Json(state.facade.list_comments(&actor, id, axis).await?))
}

/// POST /api/workflows/{id}/comments
/// Body: { "axis_id": "...", "parent_id": "..."?, "body": "..." }
async fn add_comment(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Json(payload): Json<PostCommentRequest>,
) -> Result<(StatusCode, Json<AxisComment>), ApiError> {
    let comment = state
        .facade
        .add_comment(&actor, id, payload.axis_id, payload.parent_id, &payload.body)
        .await?;
    Ok((StatusCode::CREATED, Json(comment)))
}

/// POST /api/comments/{id}/resolve
/// Body (optional): { "cascade": true }
async fn resolve_comment(
    State(state): State<AppState>,
    actor: Actor,
    Path(comment_id): Path<CommentId>,
    payload: Option<Json<ResolveRequest>>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let cascade = payload.map(|Json(p)| p.cascade).unwrap_or(false);
    let outcome = state.facade.resolve_comment(&actor, comment_id, cascade).await?;
    let warning = outcome.has_warning().then(|| {
        format!(
            "{} unresolved repl{} remain in this thread",
            outcome.unresolved_descendants,
            if outcome.unresolved_descendants == 1 { "y" } else { "ies" }
        )
    });
    Ok(Json(ResolveResponse { outcome, warning }))
}

/// Record a heartbeat for the caller
async fn heartbeat(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<PresenceEntry>, ApiError> {
    Ok(Json(state.facade.heartbeat(&actor, id).await?))
}

async fn leave(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<StatusCode, ApiError> {
    state.facade.leave(&actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_active(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
) -> Result<Json<Vec<PresenceEntry>>, ApiError> {
    Ok(Json(state.facade.list_active(&actor, id).await?))
}

/// Page through activity after a cursor, optionally long-polling
///
/// GET /api/workflows/{id}/activity?since=12&limit=50&wait_secs=25
async fn list_activity(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    Query(query): Query<ActivityQuery>,
) -> Result<Json<ActivityPage>, ApiError> {
    let wait = Duration::from_secs(query.wait_secs.min(MAX_WAIT_SECS));
    let page = state
        .facade
        .wait_activity(&actor, id, query.since, query.limit, wait)
        .await?;
    Ok(Json(page))
}

/// POST /api/workflows/{id}/advice
/// Body: { "kind": "guidance" | "consistency_check" | "gap_analysis", "axis_id": "..."? }
async fn advise(
    State(state): State<AppState>,
    actor: Actor,
    Path(id): Path<WorkflowId>,
    payload: Option<Json<AdviceRequest>>,
) -> Result<Json<Advice>, ApiError> {
    let request = payload.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.facade.advise(&actor, id, request.kind, request.axis_id).await?))
}
