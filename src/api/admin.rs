/// Administrative endpoints

use super::{error::ApiError, workflows::AppState};
use crate::{
    access::{Actor, Permission, Role},
    workflow::Operation,
};
use axum::{extract::State, response::Json, routing::put, Router};
use std::collections::{BTreeSet, HashMap};

pub fn create_admin_routes() -> Router<AppState> {
    Router::new().route("/api/admin/roles", put(replace_roles).get(list_roles))
}

/// Replace the whole role table atomically
///
/// PUT /api/admin/roles
/// Body: { "consultant": ["author", "comment", "view"], ... }
async fn replace_roles(
    State(state): State<AppState>,
    actor: Actor,
    Json(roles): Json<HashMap<Role, BTreeSet<Permission>>>,
) -> Result<Json<HashMap<Role, BTreeSet<Permission>>>, ApiError> {
    state.facade.authorize(&actor, Operation::ConfigureRoles)?;
    if roles.is_empty() {
        return Err(ApiError::bad_request("role table must not be empty"));
    }

    tracing::info!("🔐 {} is replacing the role table", actor.user_id);
    state.roles.replace_roles(roles);
    Ok(Json(state.roles.roles().as_ref().clone()))
}

async fn list_roles(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<HashMap<Role, BTreeSet<Permission>>>, ApiError> {
    state.facade.authorize(&actor, Operation::ConfigureRoles)?;
    Ok(Json(state.roles.roles().as_ref().clone()))
}
