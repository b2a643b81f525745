use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use gatehouse_auth::Session;
use gatehouse_core::UserId;

use super::{RotateOutcome, SessionStore};
use crate::StoreError;

/// In-memory session store.
///
/// One mutex guards the whole map, so rotation is a single critical section.
/// Used as the durable backend in development and tests.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Session>>, StoreError> {
        self.sessions.lock().map_err(|_| StoreError::poisoned())
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut sessions = self.lock()?;
        if sessions.contains_key(&session.refresh_token) {
            return Err(StoreError::Conflict("refresh token already in use".to_string()));
        }
        sessions.insert(session.refresh_token.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, refresh_token: &str) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.get(refresh_token).cloned())
    }

    async fn mark_revoked(&self, refresh_token: &str) -> Result<bool, StoreError> {
        let mut sessions = self.lock()?;
        Ok(match sessions.get_mut(refresh_token) {
            Some(session) if !session.revoked => {
                session.revoked = true;
                true
            }
            _ => false,
        })
    }

    async fn rotate(
        &self,
        old_refresh_token: &str,
        replacement: &Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        let mut sessions = self.lock()?;
        if sessions.contains_key(&replacement.refresh_token) {
            return Err(StoreError::Conflict("refresh token already in use".to_string()));
        }

        let Some(old) = sessions.get_mut(old_refresh_token) else {
            return Ok(RotateOutcome::Missing);
        };
        if old.revoked {
            return Ok(RotateOutcome::Revoked);
        }
        if old.is_expired(now) {
            return Ok(RotateOutcome::Expired);
        }

        old.revoked = true;
        sessions.insert(replacement.refresh_token.clone(), replacement.clone());
        Ok(RotateOutcome::Rotated)
    }

    async fn revoke_all_for_subject(&self, user: UserId) -> Result<u64, StoreError> {
        let mut sessions = self.lock()?;
        let mut revoked = 0;
        for session in sessions.values_mut().filter(|s| s.user_id == user && !s.revoked) {
            session.revoked = true;
            revoked += 1;
        }
        Ok(revoked)
    }

    async fn list_live_for_subject(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        let sessions = self.lock()?;
        let mut live: Vec<Session> = sessions
            .values()
            .filter(|s| s.user_id == user && s.is_live(now))
            .cloned()
            .collect();
        live.sort_by_key(|s| s.created_at);
        Ok(live)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.lock()?;
        let before = sessions.len();
        sessions.retain(|_, s| !s.is_expired(now));
        Ok((before - sessions.len()) as u64)
    }
}
