/// Actor extraction
///
/// Identity arrives pre-authenticated from the gateway in two headers:
/// `x-actor-id` and `x-actor-role`.

use super::error::ApiError;
use crate::access::Actor;
use axum::{extract::FromRequestParts, http::request::Parts};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        match (header(ACTOR_ID_HEADER), header(ACTOR_ROLE_HEADER)) {
            (Some(user_id), Some(role)) => Ok(Actor::new(user_id, role)),
            _ => Err(ApiError::unauthenticated()),
        }
    }
}
