/// Reviewer identity resolution
///
/// Review requests may only name identities the directory knows about.

use super::UserId;
use crate::error::EngineResult;
use async_trait::async_trait;
use std::collections::HashSet;

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// Returns the ids that do not resolve to a valid identity (empty = all valid)
    async fn unresolved(&self, ids: &[UserId]) -> EngineResult<Vec<UserId>>;
}

/// Directory backed by a fixed allow-list
///
/// With no list configured every non-blank id resolves, which suits deployments
/// where the RBAC collaborator already vetted the ids before they reach the engine.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    known: Option<HashSet<UserId>>,
}

impl StaticDirectory {
    pub fn open() -> Self {
        Self { known: None }
    }

    pub fn with_users<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Some(users.into_iter().map(|u| UserId(u.into())).collect()),
        }
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn unresolved(&self, ids: &[UserId]) -> EngineResult<Vec<UserId>> {
        Ok(ids
            .iter()
            .filter(|id| {
                id.as_str().trim().is_empty()
                    || self.known.as_ref().is_some_and(|known| !known.contains(*id))
            })
            .cloned()
            .collect())
    }
}
