//! Caller identity for engine operations.
//!
//! The engine never authenticates. Every public operation receives an
//! `AuthContext` produced by the caller's identity provider and only
//! performs authorization checks (owner-or-admin).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Verified caller identity supplied with every public engine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthContext {
    /// A regular member context.
    pub fn member(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Member,
        }
    }

    /// An admin context.
    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    /// Whether this caller may act on a resource owned by `owner_id`.
    pub fn can_act_on(&self, owner_id: Uuid) -> bool {
        self.role == Role::Admin || self.user_id == owner_id
    }
}

/// Caller role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
}
