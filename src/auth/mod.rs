//! Authentication and authorization module
//!
//! Resolves a bearer token to the acting identity and its role.
//! Credential issuance lives outside this service; `issue_token` exists for
//! operators and tests.

mod jwt;
mod middleware;

pub use jwt::{decode_token, issue_token, Claims};
pub use middleware::{auth_middleware, require};

use serde::{Deserialize, Serialize};

/// User roles for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Full access, including version store administration
    Admin,
    /// Proposes changes
    Maker,
    /// Approves or rejects proposed changes
    Checker,
}

impl Role {
    pub fn can_propose(&self) -> bool {
        matches!(self, Role::Maker | Role::Admin)
    }

    pub fn can_review(&self) -> bool {
        matches!(self, Role::Checker | Role::Admin)
    }

    pub fn can_view_audit(&self) -> bool {
        matches!(self, Role::Checker | Role::Admin)
    }

    pub fn can_administer(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Maker => write!(f, "maker"),
            Role::Checker => write!(f, "checker"),
        }
    }
}

/// The authenticated caller of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role,
        }
    }
}

impl From<Claims> for Actor {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            name: claims.name,
            role: claims.role,
        }
    }
}
