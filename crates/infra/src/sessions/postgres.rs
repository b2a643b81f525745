//! Postgres-backed session store (the durable backend).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

use gatehouse_auth::Session;
use gatehouse_core::UserId;

use super::{RotateOutcome, SessionStore};
use crate::StoreError;
use crate::postgres::{is_unique_violation, map_sqlx_error};

const SESSION_COLUMNS: &str = "refresh_token, user_id, created_at, expires_at, revoked, ip_address, user_agent";

#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    refresh_token: String,
    user_id: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    revoked: bool,
    ip_address: Option<String>,
    user_agent: Option<String>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            user_id: UserId::from_uuid(row.user_id),
            refresh_token: row.refresh_token,
            created_at: row.created_at,
            expires_at: row.expires_at,
            revoked: row.revoked,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
        }
    }
}

fn insert_error(operation: &str, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        StoreError::Conflict("refresh token already in use".to_string())
    } else {
        map_sqlx_error(operation, err)
    }
}

/// Serializes rotation against revoke-all for one subject until the
/// surrounding transaction ends.
async fn lock_subject(conn: &mut PgConnection, operation: &str, user: UserId) -> Result<(), StoreError> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::TEXT, 0))")
        .bind(user.as_uuid())
        .execute(conn)
        .await
        .map_err(|e| map_sqlx_error(operation, e))?;
    Ok(())
}

const INSERT_SESSION: &str = r#"
    INSERT INTO sessions (refresh_token, user_id, created_at, expires_at, revoked, ip_address, user_agent)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
"#;

#[async_trait]
impl SessionStore for PostgresSessionStore {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    #[instrument(skip(self), err)]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("health_check", e))?;
        Ok(())
    }

    #[instrument(skip(self, session), fields(user_id = %session.user_id, session = session.fingerprint()), err)]
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        sqlx::query(INSERT_SESSION)
            .bind(&session.refresh_token)
            .bind(session.user_id.as_uuid())
            .bind(session.created_at)
            .bind(session.expires_at)
            .bind(session.revoked)
            .bind(&session.ip_address)
            .bind(&session.user_agent)
            .execute(&*self.pool)
            .await
            .map_err(|e| insert_error("create_session", e))?;
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn get(&self, refresh_token: &str) -> Result<Option<Session>, StoreError> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE refresh_token = $1");
        let row = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(refresh_token)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_session", e))?;
        Ok(row.map(Session::from))
    }

    #[instrument(skip_all, err)]
    async fn mark_revoked(&self, refresh_token: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE sessions SET revoked = TRUE WHERE refresh_token = $1 AND revoked = FALSE")
            .bind(refresh_token)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("mark_revoked", e))?;
        Ok(result.rows_affected() == 1)
    }

    /// The conditional UPDATE is the compare-and-swap: a concurrent rotation
    /// blocks on the row lock, then re-evaluates `revoked = FALSE` and matches
    /// nothing. The subject lock keeps a concurrent revoke-all from missing the
    /// replacement row.
    #[instrument(skip_all, fields(user_id = %replacement.user_id), err)]
    async fn rotate(
        &self,
        old_refresh_token: &str,
        replacement: &Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        lock_subject(&mut *tx, "rotate", replacement.user_id).await?;

        let swapped = sqlx::query(
            r#"
            UPDATE sessions SET revoked = TRUE
            WHERE refresh_token = $1 AND revoked = FALSE AND expires_at >= $2
            "#,
        )
        .bind(old_refresh_token)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("rotate", e))?;

        if swapped.rows_affected() == 0 {
            let current = sqlx::query_as::<_, (bool, DateTime<Utc>)>(
                "SELECT revoked, expires_at FROM sessions WHERE refresh_token = $1",
            )
            .bind(old_refresh_token)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("rotate", e))?;
            tx.rollback().await.map_err(|e| map_sqlx_error("rollback", e))?;

            return Ok(match current {
                None => RotateOutcome::Missing,
                Some((true, _)) => RotateOutcome::Revoked,
                Some((false, _)) => RotateOutcome::Expired,
            });
        }

        sqlx::query(INSERT_SESSION)
            .bind(&replacement.refresh_token)
            .bind(replacement.user_id.as_uuid())
            .bind(replacement.created_at)
            .bind(replacement.expires_at)
            .bind(replacement.revoked)
            .bind(&replacement.ip_address)
            .bind(&replacement.user_agent)
            .execute(&mut *tx)
            .await
            .map_err(|e| insert_error("rotate", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(RotateOutcome::Rotated)
    }

    /// Waits out any rotation in flight for `user`, so its replacement row is
    /// committed before the UPDATE takes its snapshot.
    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn revoke_all_for_subject(&self, user: UserId) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await.map_err(|e| map_sqlx_error("begin_transaction", e))?;
        lock_subject(&mut *tx, "revoke_all_for_subject", user).await?;

        let result = sqlx::query("UPDATE sessions SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE")
            .bind(user.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("revoke_all_for_subject", e))?;

        tx.commit().await.map_err(|e| map_sqlx_error("commit", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn list_live_for_subject(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        let sql = format!(
            r#"
            SELECT {SESSION_COLUMNS} FROM sessions
            WHERE user_id = $1 AND revoked = FALSE AND expires_at >= $2
            ORDER BY created_at
            "#
        );
        let rows = sqlx::query_as::<_, SessionRow>(&sql)
            .bind(user.as_uuid())
            .bind(now)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_live_for_subject", e))?;
        Ok(rows.into_iter().map(Session::from).collect())
    }

    #[instrument(skip(self), err)]
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at < $1")
            .bind(now)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("purge_expired", e))?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use gatehouse_auth::ClientMeta;

    use super::*;
    use crate::credentials::{CredentialStore, PostgresCredentialStore};

    async fn store_with_subject() -> (PostgresSessionStore, UserId) {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for postgres tests");
        let pool = crate::postgres::connect(&url, std::time::Duration::from_secs(5)).await.unwrap();
        crate::postgres::apply_schema(&pool).await.unwrap();

        let now = Utc::now();
        let id = UserId::new();
        let subject = gatehouse_auth::Subject {
            id,
            username: format!("pg{}", &id.to_string()[..8]),
            email: format!("{id}@example.com"),
            password_hash: "x".to_string(),
            status: gatehouse_auth::SubjectStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        PostgresCredentialStore::new(pool.clone()).create(&subject).await.unwrap();
        (PostgresSessionStore::new(pool), id)
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn rotation_is_single_use() {
        let (store, user) = store_with_subject().await;
        let old = Session::start(user, Duration::days(7), ClientMeta::default(), Utc::now());
        store.create(&old).await.unwrap();

        let first = Session::start(user, Duration::days(7), ClientMeta::default(), Utc::now());
        let second = Session::start(user, Duration::days(7), ClientMeta::default(), Utc::now());
        let (a, b) = tokio::join!(
            store.rotate(&old.refresh_token, &first, Utc::now()),
            store.rotate(&old.refresh_token, &second, Utc::now()),
        );

        let mut outcomes = vec![a.unwrap(), b.unwrap()];
        outcomes.sort_by_key(|o| *o != RotateOutcome::Rotated);
        assert_eq!(outcomes, vec![RotateOutcome::Rotated, RotateOutcome::Revoked]);

        assert_eq!(store.revoke_all_for_subject(user).await.unwrap(), 1);
        assert!(store.list_live_for_subject(user, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL"]
    async fn logout_racing_refresh_leaves_nothing_live() {
        let (store, user) = store_with_subject().await;

        for _ in 0..20 {
            let current = Session::start(user, Duration::days(7), ClientMeta::default(), Utc::now());
            store.create(&current).await.unwrap();
            let replacement = Session::start(user, Duration::days(7), ClientMeta::default(), Utc::now());

            let (rotated, revoked) = tokio::join!(
                store.rotate(&current.refresh_token, &replacement, Utc::now()),
                store.revoke_all_for_subject(user),
            );
            rotated.unwrap();
            revoked.unwrap();

            assert!(store.list_live_for_subject(user, Utc::now()).await.unwrap().is_empty());
        }
    }
}
