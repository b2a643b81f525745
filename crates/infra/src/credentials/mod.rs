//! Credential Store: subject records looked up by email, username or id.
//!
//! "Not found" is `Ok(None)`, never an error.

mod in_memory;
mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use gatehouse_auth::Subject;
use gatehouse_core::UserId;

use crate::StoreError;

pub use in_memory::InMemoryCredentialStore;
pub use postgres::PostgresCredentialStore;

/// One page of subjects that are not deleted, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectPage {
    pub subjects: Vec<Subject>,
    /// Count of all subjects that are not deleted, not just this page.
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Insert a new subject. Email or username reuse is [`StoreError::Conflict`].
    async fn create(&self, subject: &Subject) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<Subject>, StoreError>;

    /// `email` must already be normalized.
    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<Subject>, StoreError>;

    /// Replace a stored subject; `false` when it does not exist.
    async fn update(&self, subject: &Subject) -> Result<bool, StoreError>;

    /// Subjects that are not deleted, ordered by creation time.
    async fn list(&self, limit: u32, offset: u64) -> Result<SubjectPage, StoreError>;

    /// Stamp `deleted_at`; `false` when the subject is missing or already deleted.
    async fn soft_delete(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

#[async_trait]
impl<S> CredentialStore for Arc<S>
where
    S: CredentialStore + ?Sized,
{
    async fn create(&self, subject: &Subject) -> Result<(), StoreError> {
        (**self).create(subject).await
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<Subject>, StoreError> {
        (**self).find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, StoreError> {
        (**self).find_by_email(email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Subject>, StoreError> {
        (**self).find_by_username(username).await
    }

    async fn update(&self, subject: &Subject) -> Result<bool, StoreError> {
        (**self).update(subject).await
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<SubjectPage, StoreError> {
        (**self).list(limit, offset).await
    }

    async fn soft_delete(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        (**self).soft_delete(id, at).await
    }
}
