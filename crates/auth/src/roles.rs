//! Roles and the association entities joining them to subjects and permissions.
//!
//! Joins are explicit rows (keyed by both ids) rather than collections embedded
//! on either side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{PermissionId, RoleId, UserId};

use crate::AuthError;

/// Name of the role holding every catalog permission.
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn new(name: impl Into<String>, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: RoleId::new(),
            name: name.into(),
            description: description.into(),
            created_at: now,
        }
    }
}

/// Validate and normalize a role name.
pub fn validate_role_name(name: &str) -> Result<String, AuthError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AuthError::validation("role name cannot be empty"));
    }
    if name.len() > 50 {
        return Err(AuthError::validation("role name longer than 50 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AuthError::validation(
            "role name may only contain letters, digits, '_' and '-'",
        ));
    }
    Ok(name.to_string())
}

/// Subject ↔ Role. Unique per (user_id, role_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub user_id: UserId,
    pub role_id: RoleId,
    pub assigned_at: DateTime<Utc>,
}

/// Role ↔ Permission. Unique per (role_id, permission_id).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: RoleId,
    pub permission_id: PermissionId,
}

/// Subject ↔ Permission override. At most one row per (user_id, permission_id);
/// `is_denied = true` removes the permission even if a role grants it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectGrant {
    pub user_id: UserId,
    pub permission_id: PermissionId,
    pub is_denied: bool,
    pub updated_at: DateTime<Utc>,
}
