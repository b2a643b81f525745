//! Permission Resolution Engine.
//!
//! Every decision reads a fresh [`SubjectGrants`] snapshot from the store;
//! nothing is cached, so a mutation is visible to the very next check.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use gatehouse_auth::{
    ADMIN_ROLE, Action, AuthConfig, AuthError, AuthorizationExplanation, Capability, DEFAULT_PERMISSIONS,
    DEFAULT_USER_PERMISSIONS, DirectGrant, EffectivePermissions, Permission, PermissionSpec, Resource, Role,
    RoleAssignment, SubjectGrants, authorize, validate_role_name,
};
use gatehouse_core::{PermissionId, RoleId, UserId};

use crate::credentials::CredentialStore;
use crate::permissions::{AssignOutcome, DeleteRoleOutcome, PermissionFilter, PermissionStats, PermissionStore};
use crate::timeout::bounded;
use crate::StoreError;

/// What `seed_defaults` actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
    pub permissions_created: usize,
    pub roles_created: usize,
    pub links_added: usize,
}

pub struct PermissionEngine {
    store: Arc<dyn PermissionStore>,
    credentials: Arc<dyn CredentialStore>,
    store_timeout: Duration,
    default_role: String,
}

impl PermissionEngine {
    pub fn new(config: &AuthConfig, store: Arc<dyn PermissionStore>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            credentials,
            store_timeout: config.store_timeout,
            default_role: config.default_role.clone(),
        }
    }

    async fn call<T, F>(&self, operation: &'static str, call: F) -> Result<T, AuthError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        Ok(bounded(self.store_timeout, operation, call).await?)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Resolution
    // ─────────────────────────────────────────────────────────────────────

    /// One consistent read of everything that decides `user`'s permissions.
    pub async fn grants(&self, user: UserId) -> Result<SubjectGrants, AuthError> {
        self.call("subject_grants", self.store.subject_grants(user)).await
    }

    pub async fn effective_permissions(&self, user: UserId) -> Result<EffectivePermissions, AuthError> {
        Ok(authorize::resolve_effective(&self.grants(user).await?))
    }

    /// `Ok(false)` when nothing grants the capability; absence is not a fault.
    #[instrument(skip(self), fields(user_id = %user, capability = %Capability::new(resource, action)), err)]
    pub async fn check(&self, user: UserId, resource: Resource, action: Action) -> Result<bool, AuthError> {
        let grants = self.grants(user).await?;
        Ok(authorize::check(&grants, Capability::new(resource, action)))
    }

    pub async fn explain(
        &self,
        user: UserId,
        resource: Resource,
        action: Action,
    ) -> Result<AuthorizationExplanation, AuthError> {
        let grants = self.grants(user).await?;
        Ok(authorize::explain(user, &grants, Capability::new(resource, action)))
    }

    /// Permissions carried by each assigned role, keyed by role name.
    pub async fn subject_role_permissions(&self, user: UserId) -> Result<BTreeMap<String, Vec<Permission>>, AuthError> {
        let grants = self.grants(user).await?;
        let mut grouped: BTreeMap<String, Vec<Permission>> =
            grants.roles.iter().map(|r| (r.name.clone(), Vec::new())).collect();
        for (role, permission) in grants.role_permissions {
            grouped.entry(role).or_default().push(permission);
        }
        for permissions in grouped.values_mut() {
            permissions.sort_by(|a, b| a.name.cmp(&b.name));
        }
        Ok(grouped)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subject assignments and direct grants
    // ─────────────────────────────────────────────────────────────────────

    /// Holding the role already is an error, not a no-op.
    #[instrument(skip(self), fields(user_id = %user, role_id = %role), err)]
    pub async fn assign_role(&self, user: UserId, role: RoleId) -> Result<(), AuthError> {
        self.require_subject(user).await?;
        self.get_role(role).await?;

        let assignment = RoleAssignment {
            user_id: user,
            role_id: role,
            assigned_at: Utc::now(),
        };
        match bounded(self.store_timeout, "assign_role", self.store.assign_role(&assignment)).await {
            Ok(AssignOutcome::Assigned) => {
                info!(user_id = %user, role_id = %role, "role assigned");
                Ok(())
            }
            Ok(AssignOutcome::AlreadyHeld) => Err(AuthError::DuplicateAssignment),
            // Role deleted between the lookup and the insert.
            Err(StoreError::Conflict(_)) => Err(AuthError::NotFound("role")),
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self), fields(user_id = %user, role_id = %role), err)]
    pub async fn remove_role(&self, user: UserId, role: RoleId) -> Result<(), AuthError> {
        if self.call("remove_role", self.store.remove_role(user, role)).await? {
            info!(user_id = %user, role_id = %role, "role removed");
            Ok(())
        } else {
            Err(AuthError::NotFound("role assignment"))
        }
    }

    pub async fn subject_roles(&self, user: UserId) -> Result<Vec<Role>, AuthError> {
        self.call("subject_roles", self.store.subject_roles(user)).await
    }

    /// Upsert the single direct row for `(user, permission)`.
    #[instrument(skip(self), fields(user_id = %user, permission_id = %permission), err)]
    pub async fn grant_direct(&self, user: UserId, permission: PermissionId, is_denied: bool) -> Result<(), AuthError> {
        self.require_subject(user).await?;
        self.get_permission(permission).await?;

        let grant = DirectGrant {
            user_id: user,
            permission_id: permission,
            is_denied,
            updated_at: Utc::now(),
        };
        match bounded(self.store_timeout, "upsert_direct_grant", self.store.upsert_direct_grant(&grant)).await {
            Ok(()) => {
                info!(user_id = %user, permission_id = %permission, is_denied, "direct grant written");
                Ok(())
            }
            Err(StoreError::Conflict(_)) => Err(AuthError::NotFound("permission")),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent: removing an absent row succeeds.
    pub async fn revoke_direct(&self, user: UserId, permission: PermissionId) -> Result<(), AuthError> {
        self.call("remove_direct_grant", self.store.remove_direct_grant(user, permission))
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Roles
    // ─────────────────────────────────────────────────────────────────────

    pub async fn create_role(&self, name: &str, description: &str) -> Result<Role, AuthError> {
        let name = validate_role_name(name)?;
        let role = Role::new(name, description.trim(), Utc::now());
        match bounded(self.store_timeout, "create_role", self.store.create_role(&role)).await {
            Ok(()) => {
                info!(role = %role.name, "role created");
                Ok(role)
            }
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicateRole(role.name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_role(&self, id: RoleId) -> Result<Role, AuthError> {
        self.call("get_role", self.store.get_role(id))
            .await?
            .ok_or(AuthError::NotFound("role"))
    }

    pub async fn list_roles(&self) -> Result<Vec<Role>, AuthError> {
        self.call("list_roles", self.store.list_roles()).await
    }

    /// Rename and/or redescribe a role; a rename must not collide.
    pub async fn update_role(
        &self,
        id: RoleId,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<Role, AuthError> {
        let mut role = self.get_role(id).await?;
        if let Some(name) = name {
            role.name = validate_role_name(name)?;
        }
        if let Some(description) = description {
            role.description = description.trim().to_string();
        }

        match bounded(self.store_timeout, "update_role", self.store.update_role(&role)).await {
            Ok(true) => Ok(role),
            Ok(false) => Err(AuthError::NotFound("role")),
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicateRole(role.name)),
            Err(e) => Err(e.into()),
        }
    }

    /// Blocked, never cascaded, while any subject holds the role.
    #[instrument(skip(self), fields(role_id = %id), err)]
    pub async fn delete_role(&self, id: RoleId) -> Result<(), AuthError> {
        match self.call("delete_role", self.store.delete_role_if_unused(id)).await? {
            DeleteRoleOutcome::Deleted => {
                info!(role_id = %id, "role deleted");
                Ok(())
            }
            DeleteRoleOutcome::InUse { holders } => {
                warn!(role_id = %id, holders, "role deletion blocked: role in use");
                Err(AuthError::RoleInUse { holders })
            }
            DeleteRoleOutcome::Missing => Err(AuthError::NotFound("role")),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Permissions
    // ─────────────────────────────────────────────────────────────────────

    /// Vocabulary checks happen before anything is written.
    pub async fn create_permission(&self, spec: &PermissionSpec) -> Result<Permission, AuthError> {
        let permission = Permission::from_spec(spec.validate()?, Utc::now());
        match bounded(self.store_timeout, "create_permission", self.store.create_permission(&permission)).await {
            Ok(()) => {
                info!(permission = %permission.name, "permission created");
                Ok(permission)
            }
            Err(StoreError::Conflict(_)) => Err(AuthError::DuplicatePermission(permission.name)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_permission(&self, id: PermissionId) -> Result<Permission, AuthError> {
        self.call("get_permission", self.store.get_permission(id))
            .await?
            .ok_or(AuthError::NotFound("permission"))
    }

    pub async fn list_permissions(&self, filter: PermissionFilter) -> Result<Vec<Permission>, AuthError> {
        self.call("list_permissions", self.store.list_permissions(filter)).await
    }

    /// Idempotent.
    pub async fn add_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<(), AuthError> {
        self.get_role(role).await?;
        self.get_permission(permission).await?;
        match bounded(
            self.store_timeout,
            "add_role_permission",
            self.store.add_role_permission(role, permission),
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(StoreError::Conflict(_)) => Err(AuthError::NotFound("role or permission")),
            Err(e) => Err(e.into()),
        }
    }

    /// Idempotent.
    pub async fn remove_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<(), AuthError> {
        self.call("remove_role_permission", self.store.remove_role_permission(role, permission))
            .await?;
        Ok(())
    }

    pub async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>, AuthError> {
        self.get_role(role).await?;
        self.call("role_permissions", self.store.role_permissions(role)).await
    }

    pub async fn permission_stats(&self) -> Result<PermissionStats, AuthError> {
        self.call("permission_stats", self.store.stats()).await
    }

    // ─────────────────────────────────────────────────────────────────────
    // Seeding
    // ─────────────────────────────────────────────────────────────────────

    /// Install the default catalog plus the `admin` and default roles.
    ///
    /// Safe to run on every start: existing rows are kept as they are.
    #[instrument(skip(self), err)]
    pub async fn seed_defaults(&self) -> Result<SeedReport, AuthError> {
        let mut report = SeedReport::default();

        let mut catalog: BTreeMap<&'static str, Permission> = BTreeMap::new();
        for (name, description, resource, action) in DEFAULT_PERMISSIONS {
            let spec = PermissionSpec::new(*name, *description, resource.as_str(), action.as_str());
            let (permission, created) = self.ensure_permission(&spec).await?;
            report.permissions_created += usize::from(created);
            catalog.insert(*name, permission);
        }

        let (admin, created) = self.ensure_role(ADMIN_ROLE, "Administrator with every permission").await?;
        report.roles_created += usize::from(created);
        for permission in catalog.values() {
            let added = self
                .call("add_role_permission", self.store.add_role_permission(admin.id, permission.id))
                .await?;
            report.links_added += usize::from(added);
        }

        let (user, created) = self.ensure_role(&self.default_role, "Default role for registered subjects").await?;
        report.roles_created += usize::from(created);
        for name in DEFAULT_USER_PERMISSIONS {
            let Some(permission) = catalog.get(name) else {
                continue;
            };
            let added = self
                .call("add_role_permission", self.store.add_role_permission(user.id, permission.id))
                .await?;
            report.links_added += usize::from(added);
        }

        info!(
            permissions_created = report.permissions_created,
            roles_created = report.roles_created,
            links_added = report.links_added,
            "default roles and permissions seeded"
        );
        Ok(report)
    }

    async fn ensure_permission(&self, spec: &PermissionSpec) -> Result<(Permission, bool), AuthError> {
        if let Some(existing) = self
            .call("get_permission_by_name", self.store.get_permission_by_name(&spec.name))
            .await?
        {
            return Ok((existing, false));
        }
        match self.create_permission(spec).await {
            Ok(permission) => Ok((permission, true)),
            Err(AuthError::DuplicatePermission(_)) => self
                .call("get_permission_by_name", self.store.get_permission_by_name(&spec.name))
                .await?
                .map(|p| (p, false))
                .ok_or(AuthError::NotFound("permission")),
            Err(e) => Err(e),
        }
    }

    async fn ensure_role(&self, name: &str, description: &str) -> Result<(Role, bool), AuthError> {
        if let Some(existing) = self.call("get_role_by_name", self.store.get_role_by_name(name)).await? {
            return Ok((existing, false));
        }
        match self.create_role(name, description).await {
            Ok(role) => Ok((role, true)),
            Err(AuthError::DuplicateRole(_)) => self
                .call("get_role_by_name", self.store.get_role_by_name(name))
                .await?
                .map(|r| (r, false))
                .ok_or(AuthError::NotFound("role")),
            Err(e) => Err(e),
        }
    }

    async fn require_subject(&self, user: UserId) -> Result<(), AuthError> {
        self.call("find_subject_by_id", self.credentials.find_by_id(user))
            .await?
            .filter(|s| !s.is_deleted())
            .map(|_| ())
            .ok_or(AuthError::NotFound("subject"))
    }
}
