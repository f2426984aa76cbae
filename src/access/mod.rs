/// Identity and authorization layer
///
/// The engine does not authenticate anyone. Callers arrive with an actor id and
/// a role issued by an external RBAC system; this module decides what that role
/// may do and resolves reviewer identities.

// Role → permission table with lock-free hot swapping
pub mod policy;

// Reviewer identity resolution
pub mod directory;

pub use directory::{IdentityDirectory, StaticDirectory};
pub use policy::{AccessPolicy, Permission, RolePolicy};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity issued by the authentication collaborator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Role name as assigned by the RBAC collaborator (e.g. "consultant", "approver")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(pub String);

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The authenticated caller of a facade verb
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            user_id: UserId(user_id.into()),
            role: Role(role.into()),
        }
    }
}
