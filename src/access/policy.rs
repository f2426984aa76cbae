/// Role-based permission checks
///
/// `RolePolicy` keeps the role table behind an ArcSwap so an administrator can
/// replace it at runtime without blocking in-flight permission checks.

use super::{Actor, Role};
use crate::error::{EngineError, EngineResult};
use crate::workflow::types::Operation;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

/// Coarse capability a role may hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Edit drafts, submit for review, restore, resume
    Author,
    /// Respond to review requests
    Review,
    /// Approve or reject workflows awaiting approval
    Approve,
    /// Act on workflows the caller did not author; archive; configure roles
    Override,
    Comment,
    View,
}

impl Permission {
    pub const ALL: [Permission; 6] = [
        Permission::Author,
        Permission::Review,
        Permission::Approve,
        Permission::Override,
        Permission::Comment,
        Permission::View,
    ];

    /// The single permission each verb requires
    pub fn required_for(operation: Operation) -> Permission {
        match operation {
            Operation::Initialize
            | Operation::SaveDraft
            | Operation::SubmitForReview
            | Operation::RequestReviews
            | Operation::RestoreVersion
            | Operation::Resume => Permission::Author,
            Operation::SubmitReview => Permission::Review,
            Operation::Approve | Operation::Reject | Operation::Amend => Permission::Approve,
            Operation::Archive | Operation::ConfigureRoles => Permission::Override,
            Operation::AddComment | Operation::ResolveComment => Permission::Comment,
            Operation::Heartbeat
            | Operation::Leave
            | Operation::ListActive
            | Operation::ListActivity
            | Operation::ListVersions
            | Operation::GetVersion
            | Operation::ListReviews
            | Operation::ListComments
            | Operation::GetWorkflow
            | Operation::Advise => Permission::View,
        }
    }
}

pub type RoleTable = HashMap<Role, BTreeSet<Permission>>;

/// Authorization collaborator seam
pub trait AccessPolicy: Send + Sync {
    /// Permissions held by a role; unknown roles hold none
    fn permissions(&self, role: &Role) -> BTreeSet<Permission>;

    fn holds(&self, actor: &Actor, permission: Permission) -> bool {
        self.permissions(&actor.role).contains(&permission)
    }

    /// Fails with `Forbidden` unless the actor's role may invoke the operation
    fn check(&self, actor: &Actor, operation: Operation) -> EngineResult<()> {
        if self.holds(actor, Permission::required_for(operation)) {
            Ok(())
        } else {
            tracing::warn!(
                "🚫 {} ({}) denied {}",
                actor.user_id,
                actor.role,
                operation
            );
            Err(EngineError::Forbidden {
                actor: actor.user_id.clone(),
                operation,
            })
        }
    }
}

/// Role table held in memory with atomic replacement
#[derive(Debug)]
pub struct RolePolicy {
    roles: ArcSwap<RoleTable>,
}

impl RolePolicy {
    pub fn new(roles: RoleTable) -> Self {
        Self {
            roles: ArcSwap::new(Arc::new(roles)),
        }
    }

    /// Default consulting roles
    pub fn with_defaults() -> Self {
        Self::new(default_roles())
    }

    /// Swap in a new role table; concurrent checks see either the old or the new table
    pub fn replace_roles(&self, roles: RoleTable) {
        tracing::info!("🔐 Replacing role table ({} roles)", roles.len());
        self.roles.store(Arc::new(roles));
    }

    /// Current role table
    pub fn roles(&self) -> Arc<RoleTable> {
        self.roles.load_full()
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl AccessPolicy for RolePolicy {
    fn permissions(&self, role: &Role) -> BTreeSet<Permission> {
        self.roles.load().get(role).cloned().unwrap_or_default()
    }
}

pub fn default_roles() -> RoleTable {
    use Permission::*;

    let mut roles = RoleTable::new();
    roles.insert(Role::from("consultant"), BTreeSet::from([Author, Comment, View]));
    roles.insert(Role::from("reviewer"), BTreeSet::from([Review, Comment, View]));
    roles.insert(Role::from("client"), BTreeSet::from([Review, Comment, View]));
    roles.insert(
        Role::from("approver"),
        BTreeSet::from([Approve, Review, Comment, View]),
    );
    roles.insert(Role::from("admin"), Permission::ALL.into_iter().collect());
    roles
}
