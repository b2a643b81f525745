//! Postgres-backed permission store.
//!
//! Association tables carry composite primary keys, so duplicate links are
//! rejected by the database rather than by a read-then-write check.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use gatehouse_auth::{Action, DirectGrant, Permission, Resource, Role, RoleAssignment, SubjectGrants};
use gatehouse_core::{PermissionId, RoleId, UserId};

use super::{AssignOutcome, DeleteRoleOutcome, PermissionFilter, PermissionStats, PermissionStore};
use crate::StoreError;
use crate::postgres::map_sqlx_error;

#[derive(Debug, Clone)]
pub struct PostgresPermissionStore {
    pool: Arc<PgPool>,
}

impl PostgresPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn begin(&self, operation: &str) -> Result<Transaction<'_, Postgres>, StoreError> {
        self.pool.begin().await.map_err(|e| map_sqlx_error(operation, e))
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: Uuid,
    name: String,
    description: String,
    created_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: Uuid,
    name: String,
    description: String,
    resource: String,
    action: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<PermissionRow> for Permission {
    type Error = StoreError;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        let id = row.id;
        let corrupt = move |e: gatehouse_auth::AuthError| StoreError::Corrupt(format!("permission {id}: {e}"));
        Ok(Permission {
            id: PermissionId::from_uuid(row.id),
            resource: Resource::from_str(&row.resource).map_err(corrupt)?,
            action: Action::from_str(&row.action).map_err(corrupt)?,
            name: row.name,
            description: row.description,
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct LabeledPermissionRow {
    label: String,
    #[sqlx(flatten)]
    permission: PermissionRow,
}

#[derive(Debug, FromRow)]
struct DirectRow {
    is_denied: bool,
    #[sqlx(flatten)]
    permission: PermissionRow,
}

fn decode_permissions(rows: Vec<PermissionRow>) -> Result<Vec<Permission>, StoreError> {
    rows.into_iter().map(Permission::try_from).collect()
}

const ROLE_COLUMNS: &str = "r.id, r.name, r.description, r.created_at";
const PERMISSION_COLUMNS: &str = "p.id, p.name, p.description, p.resource, p.action, p.created_at";

#[async_trait]
impl PermissionStore for PostgresPermissionStore {
    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn create_role(&self, role: &Role) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO roles (id, name, description, created_at) VALUES ($1, $2, $3, $4)")
            .bind(role.id.as_uuid())
            .bind(&role.name)
            .bind(&role.description)
            .bind(role.created_at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("create_role", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_role(&self, id: RoleId) -> Result<Option<Role>, StoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.id = $1");
        let row = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        Ok(row.map(Role::from))
    }

    #[instrument(skip(self), err)]
    async fn get_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r WHERE r.name = $1");
        let row = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role_by_name", e))?;
        Ok(row.map(Role::from))
    }

    #[instrument(skip(self), err)]
    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let sql = format!("SELECT {ROLE_COLUMNS} FROM roles r ORDER BY r.name");
        let rows = sqlx::query_as::<_, RoleRow>(&sql)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn update_role(&self, role: &Role) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE roles SET name = $2, description = $3 WHERE id = $1")
            .bind(role.id.as_uuid())
            .bind(&role.name)
            .bind(&role.description)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("update_role", e))?;
        Ok(result.rows_affected() == 1)
    }

    /// Locks the role row first; concurrent assignments need a key-share lock
    /// on the same row for their foreign key, so they wait for this to finish.
    #[instrument(skip(self), err)]
    async fn delete_role_if_unused(&self, id: RoleId) -> Result<DeleteRoleOutcome, StoreError> {
        let mut tx = self.begin("delete_role").await?;

        let exists = sqlx::query_scalar::<_, Uuid>("SELECT id FROM roles WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if exists.is_none() {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(DeleteRoleOutcome::Missing);
        }

        let holders = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM role_assignments WHERE role_id = $1")
            .bind(id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        if holders > 0 {
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;
            return Ok(DeleteRoleOutcome::InUse {
                holders: holders as u64,
            });
        }

        sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;
        sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_role", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(DeleteRoleOutcome::Deleted)
    }

    #[instrument(skip(self, permission), fields(permission = %permission.name), err)]
    async fn create_permission(&self, permission: &Permission) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO permissions (id, name, description, resource, action, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(permission.id.as_uuid())
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(permission.resource.as_str())
        .bind(permission.action.as_str())
        .bind(permission.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_permission", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>, StoreError> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.id = $1");
        let row = sqlx::query_as::<_, PermissionRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_permission", e))?;
        row.map(Permission::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn get_permission_by_name(&self, name: &str) -> Result<Option<Permission>, StoreError> {
        let sql = format!("SELECT {PERMISSION_COLUMNS} FROM permissions p WHERE p.name = $1");
        let row = sqlx::query_as::<_, PermissionRow>(&sql)
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_permission_by_name", e))?;
        row.map(Permission::try_from).transpose()
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self, filter: PermissionFilter) -> Result<Vec<Permission>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PERMISSION_COLUMNS} FROM permissions p
            WHERE ($1::TEXT IS NULL OR p.resource = $1)
              AND ($2::TEXT IS NULL OR p.action = $2)
            ORDER BY p.name
            "#
        );
        let rows = sqlx::query_as::<_, PermissionRow>(&sql)
            .bind(filter.resource.map(|r| r.as_str()))
            .bind(filter.action.map(|a| a.as_str()))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;
        decode_permissions(rows)
    }

    #[instrument(skip(self), err)]
    async fn add_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role.as_uuid())
        .bind(permission.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("add_role_permission", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn remove_role_permission(&self, role: RoleId, permission: PermissionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = $2")
            .bind(role.as_uuid())
            .bind(permission.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_role_permission", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn role_permissions(&self, role: RoleId) -> Result<Vec<Permission>, StoreError> {
        let sql = format!(
            r#"
            SELECT {PERMISSION_COLUMNS} FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            WHERE rp.role_id = $1
            ORDER BY p.name
            "#
        );
        let rows = sqlx::query_as::<_, PermissionRow>(&sql)
            .bind(role.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("role_permissions", e))?;
        decode_permissions(rows)
    }

    #[instrument(skip(self, assignment), fields(user_id = %assignment.user_id, role_id = %assignment.role_id), err)]
    async fn assign_role(&self, assignment: &RoleAssignment) -> Result<AssignOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO role_assignments (user_id, role_id, assigned_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, role_id) DO NOTHING
            "#,
        )
        .bind(assignment.user_id.as_uuid())
        .bind(assignment.role_id.as_uuid())
        .bind(assignment.assigned_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("assign_role", e))?;

        Ok(if result.rows_affected() == 1 {
            AssignOutcome::Assigned
        } else {
            AssignOutcome::AlreadyHeld
        })
    }

    #[instrument(skip(self), err)]
    async fn remove_role(&self, user: UserId, role: RoleId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM role_assignments WHERE user_id = $1 AND role_id = $2")
            .bind(user.as_uuid())
            .bind(role.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_role", e))?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn subject_roles(&self, user: UserId) -> Result<Vec<Role>, StoreError> {
        let sql = format!(
            r#"
            SELECT {ROLE_COLUMNS} FROM roles r
            JOIN role_assignments ra ON ra.role_id = r.id
            WHERE ra.user_id = $1
            ORDER BY ra.assigned_at, r.name
            "#
        );
        let rows = sqlx::query_as::<_, RoleRow>(&sql)
            .bind(user.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("subject_roles", e))?;
        Ok(rows.into_iter().map(Role::from).collect())
    }

    #[instrument(skip(self, grant), fields(user_id = %grant.user_id, permission_id = %grant.permission_id), err)]
    async fn upsert_direct_grant(&self, grant: &DirectGrant) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO direct_grants (user_id, permission_id, is_denied, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, permission_id)
            DO UPDATE SET is_denied = EXCLUDED.is_denied, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(grant.user_id.as_uuid())
        .bind(grant.permission_id.as_uuid())
        .bind(grant.is_denied)
        .bind(grant.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_direct_grant", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn remove_direct_grant(&self, user: UserId, permission: PermissionId) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM direct_grants WHERE user_id = $1 AND permission_id = $2")
            .bind(user.as_uuid())
            .bind(permission.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("remove_direct_grant", e))?;
        Ok(result.rows_affected() == 1)
    }

    /// Three reads under one REPEATABLE READ snapshot.
    #[instrument(skip(self), err)]
    async fn subject_grants(&self, user: UserId) -> Result<SubjectGrants, StoreError> {
        let mut tx = self.begin("subject_grants").await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("subject_grants", e))?;

        let roles_sql = format!(
            r#"
            SELECT {ROLE_COLUMNS} FROM roles r
            JOIN role_assignments ra ON ra.role_id = r.id
            WHERE ra.user_id = $1
            ORDER BY ra.assigned_at, r.name
            "#
        );
        let roles: Vec<Role> = sqlx::query_as::<_, RoleRow>(&roles_sql)
            .bind(user.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("subject_grants", e))?
            .into_iter()
            .map(Role::from)
            .collect();

        let role_permissions_sql = format!(
            r#"
            SELECT r.name AS label, {PERMISSION_COLUMNS} FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.id
            JOIN roles r ON r.id = rp.role_id
            JOIN role_assignments ra ON ra.role_id = r.id
            WHERE ra.user_id = $1
            "#
        );
        let role_permissions = sqlx::query_as::<_, LabeledPermissionRow>(&role_permissions_sql)
            .bind(user.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("subject_grants", e))?
            .into_iter()
            .map(|row| Ok((row.label, Permission::try_from(row.permission)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        let direct_sql = format!(
            r#"
            SELECT dg.is_denied, {PERMISSION_COLUMNS} FROM permissions p
            JOIN direct_grants dg ON dg.permission_id = p.id
            WHERE dg.user_id = $1
            "#
        );
        let direct = sqlx::query_as::<_, DirectRow>(&direct_sql)
            .bind(user.as_uuid())
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("subject_grants", e))?
            .into_iter()
            .map(|row| Ok((Permission::try_from(row.permission)?, row.is_denied)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        Ok(SubjectGrants {
            roles,
            role_permissions,
            direct,
        })
    }

    /// Counts read under one REPEATABLE READ snapshot.
    #[instrument(skip(self), err)]
    async fn stats(&self) -> Result<PermissionStats, StoreError> {
        let mut tx = self.begin("permission_stats").await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("permission_stats", e))?;

        let (roles, permissions, links, grants, denials) = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM roles),
                (SELECT COUNT(*) FROM permissions),
                (SELECT COUNT(*) FROM role_permissions),
                (SELECT COUNT(*) FROM direct_grants WHERE NOT is_denied),
                (SELECT COUNT(*) FROM direct_grants WHERE is_denied)
            "#,
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("permission_stats", e))?;

        let by_resource = sqlx::query_as::<_, (String, i64)>(
            "SELECT resource, COUNT(*) FROM permissions GROUP BY resource",
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("permission_stats", e))?
        .into_iter()
        .map(|(resource, count)| (resource, count as u64))
        .collect();

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;

        Ok(PermissionStats {
            total_roles: roles as u64,
            total_permissions: permissions as u64,
            by_resource,
            role_permissions: links as u64,
            direct_grants: grants as u64,
            direct_denials: denials as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::SubsecRound;

    use gatehouse_auth::{PermissionSpec, Subject, SubjectStatus};

    use super::*;
    use crate::credentials::{CredentialStore, PostgresCredentialStore};

    struct Fixture {
        store: PostgresPermissionStore,
        credentials: PostgresCredentialStore,
    }

    async fn fixture() -> Fixture {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
        let pool = crate::postgres::connect(&url, Duration::from_secs(5)).await.unwrap();
        crate::postgres::apply_schema(&pool).await.unwrap();
        Fixture {
            store: PostgresPermissionStore::new(pool.clone()),
            credentials: PostgresCredentialStore::new(pool),
        }
    }

    impl Fixture {
        async fn subject(&self) -> UserId {
            let id = UserId::new();
            let now = Utc::now();
            self.credentials
                .create(&Subject {
                    id,
                    username: format!("pg{}", &id.to_string()[..8]),
                    email: format!("{id}@example.com"),
                    password_hash: "x".to_string(),
                    status: SubjectStatus::Active,
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                })
                .await
                .unwrap();
            id
        }

        /// Role and permission names carry a per-run suffix so reruns do not collide.
        async fn role(&self, name: &str) -> Role {
            let suffix = &Uuid::now_v7().simple().to_string()[20..];
            // Postgres keeps microseconds; truncate so round-tripped values compare equal.
            let role = Role::new(format!("{name}-{suffix}"), "", Utc::now().trunc_subsecs(6));
            self.store.create_role(&role).await.unwrap();
            role
        }

        async fn permission(&self, resource: &str, action: &str) -> Permission {
            let name = format!("{resource}.{action}.{}", &Uuid::now_v7().simple().to_string()[20..]);
            let spec = PermissionSpec::new(name, "", resource, action).validate().unwrap();
            let permission = Permission::from_spec(spec, Utc::now().trunc_subsecs(6));
            self.store.create_permission(&permission).await.unwrap();
            permission
        }
    }

    fn assignment(user: UserId, role: RoleId) -> RoleAssignment {
        RoleAssignment {
            user_id: user,
            role_id: role,
            assigned_at: Utc::now(),
        }
    }

    fn direct(user: UserId, permission: PermissionId, is_denied: bool) -> DirectGrant {
        DirectGrant {
            user_id: user,
            permission_id: permission,
            is_denied,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn held_roles_cannot_be_deleted() {
        let f = fixture().await;
        let user = f.subject().await;
        let role = f.role("temp").await;

        assert_eq!(f.store.assign_role(&assignment(user, role.id)).await.unwrap(), AssignOutcome::Assigned);
        assert_eq!(
            f.store.delete_role_if_unused(role.id).await.unwrap(),
            DeleteRoleOutcome::InUse { holders: 1 }
        );

        assert!(f.store.remove_role(user, role.id).await.unwrap());
        assert_eq!(f.store.delete_role_if_unused(role.id).await.unwrap(), DeleteRoleOutcome::Deleted);
        assert_eq!(f.store.delete_role_if_unused(role.id).await.unwrap(), DeleteRoleOutcome::Missing);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn second_assignment_is_reported_as_already_held() {
        let f = fixture().await;
        let user = f.subject().await;
        let role = f.role("dup").await;

        assert_eq!(f.store.assign_role(&assignment(user, role.id)).await.unwrap(), AssignOutcome::Assigned);
        assert_eq!(f.store.assign_role(&assignment(user, role.id)).await.unwrap(), AssignOutcome::AlreadyHeld);
        assert_eq!(f.store.subject_roles(user).await.unwrap(), vec![role]);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn direct_grant_upsert_keeps_one_row() {
        let f = fixture().await;
        let user = f.subject().await;
        let p = f.permission("file", "read").await;

        f.store.upsert_direct_grant(&direct(user, p.id, false)).await.unwrap();
        f.store.upsert_direct_grant(&direct(user, p.id, true)).await.unwrap();

        let grants = f.store.subject_grants(user).await.unwrap();
        assert_eq!(grants.direct, vec![(p.clone(), true)]);
        assert!(f.store.remove_direct_grant(user, p.id).await.unwrap());
        assert!(!f.store.remove_direct_grant(user, p.id).await.unwrap());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn grants_snapshot_joins_roles_and_direct_rows() {
        let f = fixture().await;
        let user = f.subject().await;
        let editor = f.role("editor").await;
        let delete = f.permission("file", "delete").await;
        let backup = f.permission("system", "backup").await;

        assert!(f.store.add_role_permission(editor.id, delete.id).await.unwrap());
        assert!(!f.store.add_role_permission(editor.id, delete.id).await.unwrap());
        f.store.assign_role(&assignment(user, editor.id)).await.unwrap();
        f.store.upsert_direct_grant(&direct(user, backup.id, false)).await.unwrap();

        let grants = f.store.subject_grants(user).await.unwrap();
        assert_eq!(grants.role_names(), vec![editor.name.clone()]);
        assert_eq!(grants.role_permissions, vec![(editor.name.clone(), delete)]);
        assert_eq!(grants.direct, vec![(backup, false)]);

        let stats = f.store.stats().await.unwrap();
        assert!(stats.total_roles >= 1);
        assert!(stats.role_permissions >= 1);
        assert!(stats.by_resource.get("system").is_some_and(|n| *n >= 1));
    }
}
