use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use gatehouse_auth::{DirectGrant, Permission, Role, RoleAssignment, RolePermission, SubjectGrants};
use gatehouse_core::{PermissionId, RoleId, UserId};

use super::{AssignOutcome, DeleteRoleOutcome, PermissionFilter, PermissionStats, PermissionStore};
use crate::StoreError;

#[derive(Debug, Default)]
struct Tables {
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    role_permissions: Vec<RolePermission>,
    /// Kept in assignment order.
    assignments: Vec<RoleAssignment>,
    direct: BTreeMap<(UserId, PermissionId), DirectGrant>,
}

impl Tables {
    fn roles_of(&self, user: UserId) -> Vec<Role> {
        self.assignments
            .iter()
            .filter(|a| a.user_id == user)
            .filter_map(|a| self.roles.get(&a.role_id).cloned())
            .collect()
    }

    fn permissions_of(&self, role: RoleId) -> Vec<Permission> {
        self.role_permissions
            .iter()
            .filter(|rp| rp.role_id == role)
            .filter_map(|rp| self.permissions.get(&rp.permission_id).cloned())
            .collect()
    }
}

/// In-memory permission store.
///
/// All tables sit behind one lock, so every read is a consistent snapshot.
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryPermissionStore {
    tables: RwLock<Tables>,
}

impl InMemoryPermissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&Tables) -> T) -> Result<T, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::poisoned())?;
        Ok(f(&tables))
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::poisoned())?;
        f(&mut tables)
    }
}

#[async_trait]
impl PermissionStore for InMemoryPermissionStore {
    async fn create_role(&self, role: &Role) -> Result<(), StoreError> {
        self.write(|t| {
            if t.roles.values().any(|r| r.name == role.name) {
                return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
            }
            t.roles.insert(role.id, role.clone());
            Ok(())
        })
    }

    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        self.read(|t| t.roles.get(&id).cloned())
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        self.read(|t| t.roles.values().find(|r| r.name == name).cloned())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        self.read(|t| {
            let mut roles: Vec<Role> = t.roles.values().cloned().collect();
            roles.sort_by(|a, b| a.name.cmp(&b.name));
            roles
        })
    }

    async fn update_role(&self, role: &Role) -> Result<bool, StoreError> {
        self.write(|t| {
            if t.roles.values().any(|r| r.id != role.id && r.name == role.name) {
                return Err(StoreError::Conflict(format!("role '{}' already exists", role.name)));
            }
            match t.roles.get_mut(&role.id) {
                Some(existing) => {
                    *existing = role.clone();
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    async fn delete_role_if_unused(&self, id: RoleId) -> Result<DeleteRoleOutcome, StoreError> {
        self.write(|t| {
            if !t.roles.contains_key(&id) {
                return Ok(DeleteRoleOutcome::Missing);
            }
            let holders = t.assignments.iter().filter(|a| a.role_id == id).count() as u64;
            if holders > 0 {
                return Ok(DeleteRoleOutcome::InUse { holders });
            }
            t.role_permissions.retain(|rp| rp.role_id != id);
            t.roles.remove(&id);
            Ok(DeleteRoleOutcome::Deleted)
        })
    }

    async fn create_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        self.write(|t| {
            if t.permissions.values().any(|p| p.name == permission.name) {
                return Err(StoreError::Conflict(format!(
                    "permission '{}' already exists",
                    permission.name
                )));
            }
            t.permissions.insert(permission.id, permission.clone());
            Ok(())
        })
    }

    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        self.read(|t| t.permissions.get(&id).cloned())
    }

    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError> {
        self.read(|t| t.permissions.values().find(|p| p.name == name).cloned())
    }

    async fn list_permissions(&self, filter: PermissionFilter) -> Result<Vec<Permission>, StoreError> {
        self.read(|t| {
            let mut permissions: Vec<Permission> =
                t.permissions.values().filter(|p| filter.matches(p)).cloned().collect();
            permissions.sort_by(|a, b| a.name.cmp(&b.name));
            permissions
        })
    }

    async fn add_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError> {
        self.write(|t| {
            if !t.roles.contains_key(&role) || !t.permissions.contains_key(&permission) {
                return Err(StoreError::Conflict("role or permission does not exist".to_string()));
            }
            if t
                .role_permissions
                .iter()
                .any(|rp| rp.role_id == role && rp.permission_id == permission)
            {
                return Ok(false);
            }
            t.role_permissions.push(RolePermission {
                role_id: role,
                permission_id: permission,
            });
            Ok(true)
        })
    }

    async fn remove_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError> {
        self.write(|t| {
            let before = t.role_permissions.len();
            t.role_permissions
                .retain(|rp| !(rp.role_id == role && rp.permission_id == permission));
            Ok(t.role_permissions.len() != before)
        })
    }

    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>, StoreError> {
        self.read(|t| t.permissions_of(role))
    }

    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<AssignOutcome, StoreError> {
        self.write(|t| {
            if !t.roles.contains_key(&assignment.role_id) {
                return Err(StoreError::Conflict(format!("role {} does not exist", assignment.role_id)));
            }
            if t
                .assignments
                .iter()
                .any(|a| a.user_id == assignment.user_id && a.role_id == assignment.role_id)
            {
                return Ok(AssignOutcome::AlreadyHeld);
            }
            t.assignments.push(assignment.clone());
            Ok(AssignOutcome::Assigned)
        })
    }

    async fn remove_role(&self, user: UserId, role: RoleId) -> Result<bool, StoreError> {
        self.write(|t| {
            let before = t.assignments.len();
            t.assignments.retain(|a| !(a.user_id == user && a.role_id == role));
            Ok(t.assignments.len() != before)
        })
    }

    async fn subject_roles(&self, user: UserId) -> Result<Vec<Role>, StoreError> {
        self.read(|t| t.roles_of(user))
    }

    async fn upsert_direct_grant(&self, grant: &DirectGrant) -> Result<(), StoreError> {
        self.write(|t| {
            if !t.permissions.contains_key(&grant.permission_id) {
                return Err(StoreError::Conflict(format!(
                    "permission {} does not exist",
                    grant.permission_id
                )));
            }
            t.direct.insert((grant.user_id, grant.permission_id), grant.clone());
            Ok(())
        })
    }

    async fn remove_direct_grant(&self, user: UserId, permission: PermissionId) -> Result<bool, StoreError> {
        self.write(|t| Ok(t.direct.remove(&(user, permission)).is_some()))
    }

    async fn subject_grants(&self, user: UserId) -> Result<SubjectGrants, StoreError> {
        self.read(|t| {
            let roles = t.roles_of(user);
            let role_permissions = roles
                .iter()
                .flat_map(|r| t.permissions_of(r.id).into_iter().map(|p| (r.name.clone(), p)))
                .collect();
            let direct = t
                .direct
                .values()
                .filter(|g| g.user_id == user)
                .filter_map(|g| t.permissions.get(&g.permission_id).map(|p| (p.clone(), g.is_denied)))
                .collect();
            SubjectGrants {
                roles,
                role_permissions,
                direct,
            }
        })
    }

    async fn stats(&self) -> Result<PermissionStats, StoreError> {
        self.read(|t| {
            let mut by_resource = BTreeMap::new();
            for p in t.permissions.values() {
                *by_resource.entry(p.resource.as_str().to_string()).or_insert(0) += 1;
            }
            let denials = t.direct.values().filter(|g| g.is_denied).count() as u64;
            PermissionStats {
                total_roles: t.roles.len() as u64,
                total_permissions: t.permissions.len() as u64,
                by_resource,
                role_permissions: t.role_permissions.len() as u64,
                direct_grants: t.direct.len() as u64 - denials,
                direct_denials: denials,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use gatehouse_auth::{Action, PermissionSpec, Resource};

    use super::*;

    fn permission(name: &str, resource: &str, action: &str) -> Permission {
        let spec = PermissionSpec::new(name, "", resource, action).validate().unwrap();
        Permission::from_spec(spec, Utc::now())
    }

    #[tokio::test]
    async fn grants_snapshot_reflects_roles_and_direct_rows() {
        let store = InMemoryPermissionStore::new();
        let user = UserId::new();
        let editor = Role::new("editor", "", Utc::now());
        let delete = permission("file.delete", "file", "delete");
        let read = permission("job.read", "job", "read");

        store.create_role(&editor).await.unwrap();
        store.create_permission(&delete).await.unwrap();
        store.create_permission(&read).await.unwrap();
        assert!(store.add_role_permission(editor.id, delete.id).await.unwrap());
        assert!(!store.add_role_permission(editor.id, delete.id).await.unwrap());
        store
            .assign_role(&RoleAssignment {
                user_id: user,
                role_id: editor.id,
                assigned_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .upsert_direct_grant(&DirectGrant {
                user_id: user,
                permission_id: read.id,
                is_denied: false,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();

        let grants = store.subject_grants(user).await.unwrap();
        assert_eq!(grants.role_names(), vec!["editor".to_string()]);
        assert_eq!(grants.role_permissions, vec![("editor".to_string(), delete)]);
        assert_eq!(grants.direct, vec![(read, false)]);
    }

    #[tokio::test]
    async fn direct_grant_upsert_overwrites() {
        let store = InMemoryPermissionStore::new();
        let user = UserId::new();
        let p = permission("file.read", "file", "read");
        store.create_permission(&p).await.unwrap();

        for is_denied in [false, true] {
            store
                .upsert_direct_grant(&DirectGrant {
                    user_id: user,
                    permission_id: p.id,
                    is_denied,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let grants = store.subject_grants(user).await.unwrap();
        assert_eq!(grants.direct, vec![(p.clone(), true)]);
        assert!(store.remove_direct_grant(user, p.id).await.unwrap());
        assert!(!store.remove_direct_grant(user, p.id).await.unwrap());
    }

    #[tokio::test]
    async fn role_delete_is_blocked_while_held() {
        let store = InMemoryPermissionStore::new();
        let user = UserId::new();
        let temp = Role::new("temp", "", Utc::now());
        store.create_role(&temp).await.unwrap();
        let assignment = RoleAssignment {
            user_id: user,
            role_id: temp.id,
            assigned_at: Utc::now(),
        };

        assert_eq!(store.assign_role(&assignment).await.unwrap(), AssignOutcome::Assigned);
        assert_eq!(store.assign_role(&assignment).await.unwrap(), AssignOutcome::AlreadyHeld);
        assert_eq!(
            store.delete_role_if_unused(temp.id).await.unwrap(),
            DeleteRoleOutcome::InUse { holders: 1 }
        );

        assert!(store.remove_role(user, temp.id).await.unwrap());
        assert_eq!(store.delete_role_if_unused(temp.id).await.unwrap(), DeleteRoleOutcome::Deleted);
        assert_eq!(store.delete_role_if_unused(temp.id).await.unwrap(), DeleteRoleOutcome::Missing);
    }

    #[tokio::test]
    async fn permission_listing_filters_by_resource() {
        let store = InMemoryPermissionStore::new();
        store.create_permission(&permission("file.read", "file", "read")).await.unwrap();
        store.create_permission(&permission("file.delete", "file", "delete")).await.unwrap();
        store.create_permission(&permission("job.read", "job", "read")).await.unwrap();

        let files = store
            .list_permissions(PermissionFilter {
                resource: Some(Resource::File),
                action: None,
            })
            .await
            .unwrap();
        assert_eq!(files.len(), 2);

        let reads = store
            .list_permissions(PermissionFilter {
                resource: None,
                action: Some(Action::Read),
            })
            .await
            .unwrap();
        assert_eq!(reads.len(), 2);

        let err = store.create_permission(&permission("job.read", "job", "read")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn stats_count_catalog_and_grants() {
        let store = InMemoryPermissionStore::new();
        let editor = Role::new("editor", "", Utc::now());
        let read = permission("file.read", "file", "read");
        let delete = permission("file.delete", "file", "delete");
        let backup = permission("system.backup", "system", "backup");
        store.create_role(&editor).await.unwrap();
        for p in [&read, &delete, &backup] {
            store.create_permission(p).await.unwrap();
        }
        store.add_role_permission(editor.id, read.id).await.unwrap();
        for (permission_id, is_denied) in [(delete.id, true), (backup.id, false)] {
            store
                .upsert_direct_grant(&DirectGrant {
                    user_id: UserId::new(),
                    permission_id,
                    is_denied,
                    updated_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_roles, 1);
        assert_eq!(stats.total_permissions, 3);
        assert_eq!(stats.by_resource.get("file"), Some(&2));
        assert_eq!(stats.by_resource.get("system"), Some(&1));
        assert_eq!(stats.role_permissions, 1);
        assert_eq!(stats.direct_grants, 1);
        assert_eq!(stats.direct_denials, 1);
    }
}
