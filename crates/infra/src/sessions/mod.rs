//! Session Store: refresh sessions keyed by their refresh-token identifier.
//!
//! Two kinds of backend implement [`SessionStore`]: durable (Postgres, or the
//! in-memory store in development) and cache (Redis). [`select_session_store`]
//! picks one at startup; callers never learn which.

mod in_memory;
mod postgres;
#[cfg(feature = "redis")]
mod redis_store;
mod select;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatehouse_auth::Session;
use gatehouse_core::UserId;

use crate::StoreError;

pub use in_memory::InMemorySessionStore;
pub use postgres::PostgresSessionStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisSessionStore;
pub use select::select_session_store;

/// Result of an atomic rotation attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// Old session revoked and replacement persisted.
    Rotated,
    Missing,
    /// Someone else already used (or revoked) the old session.
    Revoked,
    Expired,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    fn backend_name(&self) -> &'static str;

    async fn health_check(&self) -> Result<(), StoreError>;

    /// Refresh-token reuse is [`StoreError::Conflict`].
    async fn create(&self, session: &Session) -> Result<(), StoreError>;

    async fn get(&self, refresh_token: &str) -> Result<Option<Session>, StoreError>;

    /// `true` when a live session flipped to revoked; revoking twice is not an error.
    async fn mark_revoked(&self, refresh_token: &str) -> Result<bool, StoreError>;

    /// Revoke `old_refresh_token` and persist `replacement` as one transition.
    ///
    /// The revoked flag is compare-and-swapped, so of two concurrent rotations
    /// of the same token exactly one observes [`RotateOutcome::Rotated`]. When an
    /// error is returned the replacement was not persisted.
    async fn rotate(
        &self,
        old_refresh_token: &str,
        replacement: &Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError>;

    /// Revoke every session of `user`, returning how many flipped.
    ///
    /// An error means at least one session may still be live.
    async fn revoke_all_for_subject(&self, user: UserId) -> Result<u64, StoreError>;

    /// Sessions of `user` that are neither revoked nor expired at `now`.
    async fn list_live_for_subject(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError>;

    /// Drop sessions whose expiry passed before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

#[async_trait]
impl<S> SessionStore for Arc<S>
where
    S: SessionStore + ?Sized,
{
    fn backend_name(&self) -> &'static str {
        (**self).backend_name()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        (**self).health_check().await
    }

    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        (**self).create(session).await
    }

    async fn get(&self, refresh_token: &str) -> Result<Option<Session>, StoreError> {
        (**self).get(refresh_token).await
    }

    async fn mark_revoked(&self, refresh_token: &str) -> Result<bool, StoreError> {
        (**self).mark_revoked(refresh_token).await
    }

    async fn rotate(
        &self,
        old_refresh_token: &str,
        replacement: &Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        (**self).rotate(old_refresh_token, replacement, now).await
    }

    async fn revoke_all_for_subject(&self, user: UserId) -> Result<u64, StoreError> {
        (**self).revoke_all_for_subject(user).await
    }

    async fn list_live_for_subject(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        (**self).list_live_for_subject(user, now).await
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).purge_expired(now).await
    }
}
