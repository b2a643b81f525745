//! Postgres-backed credential store.
//!
//! Email uniqueness is enforced on `lower(email)`, so two spellings of one
//! address conflict even if a caller skipped normalization.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::instrument;
use uuid::Uuid;

use gatehouse_auth::{Subject, SubjectStatus};
use gatehouse_core::UserId;

use super::{CredentialStore, SubjectPage};
use crate::StoreError;
use crate::postgres::{is_unique_violation, map_sqlx_error};

const SUBJECT_COLUMNS: &str = "id, username, email, password_hash, status, created_at, updated_at, deleted_at";

#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    async fn find_one(&self, operation: &str, column: &str, value: &str) -> Result<Option<Subject>, StoreError> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE {column} = $1");
        let row = sqlx::query_as::<_, SubjectRow>(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        row.map(Subject::try_from).transpose()
    }
}

#[derive(Debug, FromRow)]
struct SubjectRow {
    id: Uuid,
    username: String,
    email: String,
    password_hash: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<SubjectRow> for Subject {
    type Error = StoreError;

    fn try_from(row: SubjectRow) -> Result<Self, Self::Error> {
        let status = SubjectStatus::from_str(&row.status)
            .map_err(|e| StoreError::Corrupt(format!("subject {}: {e}", row.id)))?;
        Ok(Subject {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[async_trait]
impl CredentialStore for PostgresCredentialStore {
    #[instrument(skip(self, subject), fields(user_id = %subject.id), err)]
    async fn create(&self, subject: &Subject) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO subjects (id, username, email, password_hash, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(subject.id.as_uuid())
        .bind(&subject.username)
        .bind(&subject.email)
        .bind(&subject.password_hash)
        .bind(subject.status.as_str())
        .bind(subject.created_at)
        .bind(subject.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("email or username already registered".to_string())
            } else {
                map_sqlx_error("create_subject", e)
            }
        })?;
        Ok(())
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_by_id(&self, id: UserId) -> Result<Option<Subject>, StoreError> {
        let sql = format!("SELECT {SUBJECT_COLUMNS} FROM subjects WHERE id = $1");
        let row = sqlx::query_as::<_, SubjectRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_subject_by_id", e))?;
        row.map(Subject::try_from).transpose()
    }

    #[instrument(skip(self, email), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, StoreError> {
        self.find_one("find_subject_by_email", "lower(email)", &email.to_lowercase()).await
    }

    #[instrument(skip(self), err)]
    async fn find_by_username(&self, username: &str) -> Result<Option<Subject>, StoreError> {
        self.find_one("find_subject_by_username", "username", username).await
    }

    #[instrument(skip(self, subject), fields(user_id = %subject.id), err)]
    async fn update(&self, subject: &Subject) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE subjects
            SET username = $2, email = $3, password_hash = $4, status = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(subject.id.as_uuid())
        .bind(&subject.username)
        .bind(&subject.email)
        .bind(&subject.password_hash)
        .bind(subject.status.as_str())
        .bind(subject.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::Conflict("email or username already registered".to_string())
            } else {
                map_sqlx_error("update_subject", e)
            }
        })?;
        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), err)]
    async fn list(&self, limit: u32, offset: u64) -> Result<SubjectPage, StoreError> {
        let sql = format!(
            r#"
            SELECT {SUBJECT_COLUMNS} FROM subjects
            WHERE deleted_at IS NULL
            ORDER BY created_at, id
            LIMIT $1 OFFSET $2
            "#
        );
        let offset_param = i64::try_from(offset).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, SubjectRow>(&sql)
            .bind(i64::from(limit))
            .bind(offset_param)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_subjects", e))?;
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM subjects WHERE deleted_at IS NULL")
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("count_subjects", e))?;

        Ok(SubjectPage {
            subjects: rows.into_iter().map(Subject::try_from).collect::<Result<_, _>>()?,
            total: total.max(0) as u64,
            limit,
            offset,
        })
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn soft_delete(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE subjects SET deleted_at = $2, updated_at = $2 WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id.as_uuid())
        .bind(at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("soft_delete_subject", e))?;
        Ok(result.rows_affected() == 1)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    async fn store() -> PostgresCredentialStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
        let pool = crate::postgres::connect(&url, Duration::from_secs(5)).await.unwrap();
        crate::postgres::apply_schema(&pool).await.unwrap();
        PostgresCredentialStore::new(pool)
    }

    /// Unique per run, so repeated runs against one database do not collide.
    fn subject(tag: &str) -> Subject {
        let id = UserId::new();
        let now = Utc::now();
        let short = &id.to_string()[..8];
        Subject {
            id,
            username: format!("{tag}{short}"),
            email: format!("{tag}.{id}@example.com"),
            password_hash: "x".to_string(),
            status: SubjectStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn email_uniqueness_ignores_case() {
        let store = store().await;
        let alice = subject("alice");
        store.create(&alice).await.unwrap();

        let mut shouting = subject("other");
        shouting.email = alice.email.to_uppercase();
        let err = store.create(&shouting).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let found = store.find_by_email(&alice.email.to_uppercase()).await.unwrap();
        assert_eq!(found.map(|s| s.id), Some(alice.id));
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn status_changes_persist_through_update() {
        let store = store().await;
        let mut bob = subject("bob");
        assert!(!store.update(&bob).await.unwrap());
        store.create(&bob).await.unwrap();

        bob.status = SubjectStatus::Banned;
        bob.updated_at = Utc::now();
        assert!(store.update(&bob).await.unwrap());

        let stored = store.find_by_id(bob.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SubjectStatus::Banned);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn soft_deleted_subjects_leave_the_listing() {
        let store = store().await;
        let carol = subject("carol");
        store.create(&carol).await.unwrap();
        let listed = |page: SubjectPage| page.subjects.iter().any(|s| s.id == carol.id);
        assert!(listed(store.list(u32::MAX, 0).await.unwrap()));

        assert!(store.soft_delete(carol.id, Utc::now()).await.unwrap());
        assert!(!store.soft_delete(carol.id, Utc::now()).await.unwrap());

        assert!(!listed(store.list(u32::MAX, 0).await.unwrap()));
        assert!(store.find_by_id(carol.id).await.unwrap().unwrap().is_deleted());

        let err = store.create(&Subject { id: UserId::new(), ..carol.clone() }).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }
}
