use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatehouse_auth::Subject;
use gatehouse_core::UserId;

use super::{CredentialStore, SubjectPage};
use crate::StoreError;

/// In-memory credential store.
///
/// Emails compare case-insensitively, as they do under the Postgres index.
/// Intended for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCredentialStore {
    subjects: RwLock<HashMap<UserId, Subject>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn find_by<P>(&self, predicate: P) -> Result<Option<Subject>, StoreError>
    where
        P: Fn(&Subject) -> bool,
    {
        let subjects = self.subjects.read().map_err(|_| StoreError::poisoned())?;
        Ok(subjects.values().find(|s| predicate(s)).cloned())
    }
}

fn clashes(a: &Subject, b: &Subject) -> bool {
    a.email.eq_ignore_ascii_case(&b.email) || a.username == b.username
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn create(&self, subject: &Subject) -> Result<(), StoreError> {
        let mut subjects = self.subjects.write().map_err(|_| StoreError::poisoned())?;

        if subjects.values().any(|s| clashes(s, subject)) {
            return Err(StoreError::Conflict("email or username already registered".to_string()));
        }
        if subjects.contains_key(&subject.id) {
            return Err(StoreError::Conflict(format!("subject {} already exists", subject.id)));
        }

        subjects.insert(subject.id, subject.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<Subject>, StoreError> {
        let subjects = self.subjects.read().map_err(|_| StoreError::poisoned())?;
        Ok(subjects.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Subject>, StoreError> {
        self.find_by(|s| s.email.eq_ignore_ascii_case(email))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Subject>, StoreError> {
        self.find_by(|s| s.username == username)
    }

    async fn update(&self, subject: &Subject) -> Result<bool, StoreError> {
        let mut subjects = self.subjects.write().map_err(|_| StoreError::poisoned())?;

        if subjects.values().any(|s| s.id != subject.id && clashes(s, subject)) {
            return Err(StoreError::Conflict("email or username already registered".to_string()));
        }

        match subjects.get_mut(&subject.id) {
            Some(existing) => {
                *existing = subject.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, limit: u32, offset: u64) -> Result<SubjectPage, StoreError> {
        let subjects = self.subjects.read().map_err(|_| StoreError::poisoned())?;
        let mut kept: Vec<&Subject> = subjects.values().filter(|s| !s.is_deleted()).collect();
        kept.sort_by_key(|s| (s.created_at, s.id));

        Ok(SubjectPage {
            total: kept.len() as u64,
            subjects: kept
                .into_iter()
                .skip(usize::try_from(offset).unwrap_or(usize::MAX))
                .take(limit as usize)
                .cloned()
                .collect(),
            limit,
            offset,
        })
    }

    async fn soft_delete(&self, id: UserId, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut subjects = self.subjects.write().map_err(|_| StoreError::poisoned())?;
        match subjects.get_mut(&id) {
            Some(subject) if !subject.is_deleted() => {
                subject.deleted_at = Some(at);
                subject.updated_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use gatehouse_auth::SubjectStatus;

    use super::*;

    fn subject(username: &str, email: &str) -> Subject {
        let now = Utc::now();
        Subject {
            id: UserId::new(),
            username: username.to_string(),
            email: email.to_string(),
            password_hash: "hash".to_string(),
            status: SubjectStatus::Active,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[tokio::test]
    async fn lookups_distinguish_missing_from_found() {
        let store = InMemoryCredentialStore::new();
        let alice = subject("alice", "alice@x.com");
        store.create(&alice).await.unwrap();

        assert_eq!(store.find_by_email("alice@x.com").await.unwrap(), Some(alice.clone()));
        assert_eq!(store.find_by_username("alice").await.unwrap(), Some(alice.clone()));
        assert_eq!(store.find_by_id(alice.id).await.unwrap(), Some(alice));
        assert_eq!(store.find_by_email("bob@x.com").await.unwrap(), None);
        assert_eq!(store.find_by_id(UserId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_email_or_username_conflicts() {
        let store = InMemoryCredentialStore::new();
        store.create(&subject("alice", "alice@x.com")).await.unwrap();

        let err = store.create(&subject("alice2", "alice@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.create(&subject("alice", "other@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let err = store.create(&subject("alice3", "ALICE@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_replaces_existing_only() {
        let store = InMemoryCredentialStore::new();
        let mut alice = subject("alice", "alice@x.com");
        assert!(!store.update(&alice).await.unwrap());

        store.create(&alice).await.unwrap();
        alice.status = SubjectStatus::Banned;
        assert!(store.update(&alice).await.unwrap());
        assert_eq!(
            store.find_by_id(alice.id).await.unwrap().map(|s| s.status),
            Some(SubjectStatus::Banned)
        );
    }

    #[tokio::test]
    async fn listing_pages_in_creation_order_and_skips_deleted() {
        let store = InMemoryCredentialStore::new();
        let base = Utc::now();
        let mut ids = Vec::new();
        for (i, name) in ["ann", "bob", "cid", "dee"].into_iter().enumerate() {
            let mut s = subject(name, &format!("{name}@x.com"));
            s.created_at = base + Duration::seconds(i as i64);
            ids.push(s.id);
            store.create(&s).await.unwrap();
        }

        assert!(store.soft_delete(ids[1], Utc::now()).await.unwrap());
        assert!(!store.soft_delete(ids[1], Utc::now()).await.unwrap());
        assert!(!store.soft_delete(UserId::new(), Utc::now()).await.unwrap());

        let page = store.list(2, 0).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.subjects.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[0], ids[2]]);
        let rest = store.list(2, 2).await.unwrap();
        assert_eq!(rest.subjects.iter().map(|s| s.id).collect::<Vec<_>>(), vec![ids[3]]);

        let deleted = store.find_by_id(ids[1]).await.unwrap().unwrap();
        assert!(deleted.is_deleted());
    }
}
