//! Permission Store: roles, permissions and their association tables.
//!
//! Every association is its own table keyed by a composite identity; nothing
//! is embedded on either side.

mod in_memory;
mod postgres;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use gatehouse_auth::{Action, DirectGrant, Permission, Resource, Role, RoleAssignment, SubjectGrants};
use gatehouse_core::{PermissionId, RoleId, UserId};

use crate::StoreError;

pub use in_memory::InMemoryPermissionStore;
pub use postgres::PostgresPermissionStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AssignOutcome {
    Assigned,
    AlreadyHeld,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeleteRoleOutcome {
    Deleted,
    InUse { holders: u64 },
    Missing,
}

/// Catalog and grant counts for the admin overview.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PermissionStats {
    pub total_roles: u64,
    pub total_permissions: u64,
    /// Permissions per resource name.
    pub by_resource: BTreeMap<String, u64>,
    pub role_permissions: u64,
    pub direct_grants: u64,
    pub direct_denials: u64,
}

/// Optional narrowing for [`PermissionStore::list_permissions`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PermissionFilter {
    pub resource: Option<Resource>,
    pub action: Option<Action>,
}

impl PermissionFilter {
    pub fn matches(&self, permission: &Permission) -> bool {
        self.resource.is_none_or(|r| r == permission.resource)
            && self.action.is_none_or(|a| a == permission.action)
    }
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Name reuse is [`StoreError::Conflict`].
    async fn create_role(&self, role: &Role) -> Result<(), StoreError>;
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError>;
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError>;
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError>;
    /// `false` when the role does not exist; name reuse is [`StoreError::Conflict`].
    async fn update_role(&self, role: &Role) -> Result<bool, StoreError>;
    /// Delete a role only if no subject holds it; the check and the delete are atomic.
    async fn delete_role_if_unused(&self, id: RoleId) -> Result<DeleteRoleOutcome, StoreError>;

    /// Name reuse is [`StoreError::Conflict`].
    async fn create_permission(&self, permission: &Permission) -> Result<(), StoreError>;
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError>;
    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError>;
    async fn list_permissions(&self, filter: PermissionFilter) -> Result<Vec<Permission>, StoreError>;

    /// `true` when the link was newly added.
    async fn add_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError>;
    /// `true` when a link was removed.
    async fn remove_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError>;
    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>, StoreError>;

    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<AssignOutcome, StoreError>;
    /// `true` when an assignment was removed.
    async fn remove_role(&self, user: UserId, role: RoleId) -> Result<bool, StoreError>;
    /// Assigned roles, earliest assignment first.
    async fn subject_roles(&self, user: UserId) -> Result<Vec<Role>, StoreError>;

    /// Insert or overwrite the single direct row for `(user, permission)`.
    async fn upsert_direct_grant(&self, grant: &DirectGrant) -> Result<(), StoreError>;
    /// `true` when a row was removed.
    async fn remove_direct_grant(&self, user: UserId, permission: PermissionId) -> Result<bool, StoreError>;

    /// Roles, role permissions and direct rows of one subject, read at one instant.
    async fn subject_grants(&self, user: UserId) -> Result<SubjectGrants, StoreError>;

    async fn stats(&self) -> Result<PermissionStats, StoreError>;
}

#[async_trait]
impl<S> PermissionStore for Arc<S>
where
    S: PermissionStore + ?Sized,
{
    async fn create_role(&self, role: &Role) -> Result<(), StoreError> {
        (**self).create_role(role).await
    }
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        (**self).get_role(id).await
    }
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        (**self).get_role_by_name(name).await
    }
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        (**self).list_roles().await
    }
    async fn update_role(&self, role: &Role) -> Result<bool, StoreError> {
        (**self).update_role(role).await
    }
    async fn delete_role_if_unused(&self, id: RoleId) -> Result<DeleteRoleOutcome, StoreError> {
        (**self).delete_role_if_unused(id).await
    }
    async fn create_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        (**self).create_permission(permission).await
    }
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        (**self).get_permission(id).await
    }
    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError> {
        (**self).get_permission_by_name(name).await
    }
    async fn list_permissions(&self, filter: PermissionFilter) -> Result<Vec<Permission>, StoreError> {
        (**self).list_permissions(filter).await
    }
    async fn add_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError> {
        (**self).add_role_permission(role, permission).await
    }
    async fn remove_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError> {
        (**self).remove_role_permission(role, permission).await
    }
    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>, StoreError> {
        (**self).role_permissions(role).await
    }
    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<AssignOutcome, StoreError> {
        (**self).assign_role(assignment).await
    }
    async fn remove_role(&self, user: UserId, role: RoleId) -> Result<bool, StoreError> {
        (**self).remove_role(user, role).await
    }
    async fn subject_roles(&self, user: UserId) -> Result<Vec<Role>, StoreError> {
        (**self).subject_roles(user).await
    }
    async fn upsert_direct_grant(&self, grant: &DirectGrant) -> Result<(), StoreError> {
        (**self).upsert_direct_grant(grant).await
    }
    async fn remove_direct_grant(&self, user: UserId, permission: PermissionId) -> Result<bool, StoreError> {
        (**self).remove_direct_grant(user, permission).await
    }
    async fn subject_grants(&self, user: UserId) -> Result<SubjectGrants, StoreError> {
        (**self).subject_grants(user).await
    }
    async fn stats(&self) -> Result<PermissionStats, StoreError> {
        (**self).stats().await
    }
}
