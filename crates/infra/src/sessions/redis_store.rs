//! Redis-backed session store (the cache backend).
//!
//! ## Layout
//!
//! - `gatehouse:session:{refresh_token}`: session JSON, expiring at the session's expiry
//! - `gatehouse:subject_sessions:{user_id}`: set of the subject's refresh tokens
//!
//! Revocation rewrites the record with `revoked = true` and keeps its TTL, so
//! a replayed token is reported as revoked, not unknown, until it expires.
//! State transitions run as Lua scripts, which Redis executes atomically.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{RedisError, Script};
use tracing::instrument;

use gatehouse_auth::Session;
use gatehouse_core::UserId;

use super::{RotateOutcome, SessionStore};
use crate::StoreError;

const SESSION_KEY_PREFIX: &str = "gatehouse:session:";
const SUBJECT_KEY_PREFIX: &str = "gatehouse:subject_sessions:";

/// KEYS: session, subject set. ARGV: JSON, expiry ms, token. Returns 0 when the token exists.
const CREATE_SCRIPT: &str = r#"
if not redis.call('SET', KEYS[1], ARGV[1], 'PXAT', ARGV[2], 'NX') then return 0 end
redis.call('SADD', KEYS[2], ARGV[3])
if redis.call('PEXPIRETIME', KEYS[2]) < tonumber(ARGV[2]) then
  redis.call('PEXPIREAT', KEYS[2], ARGV[2])
end
return 1
"#;

/// KEYS[1] session key. Returns 1 when the flag flipped.
const REVOKE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 0 end
local session = cjson.decode(raw)
if session.revoked then return 0 end
session.revoked = true
redis.call('SET', KEYS[1], cjson.encode(session), 'KEEPTTL')
return 1
"#;

/// KEYS: old session, new session, subject set. ARGV: new JSON, new expiry ms, new token.
const ROTATE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then return 'missing' end
local session = cjson.decode(raw)
if session.revoked then return 'revoked' end
if redis.call('EXISTS', KEYS[2]) == 1 then return 'conflict' end
session.revoked = true
redis.call('SET', KEYS[1], cjson.encode(session), 'KEEPTTL')
redis.call('SET', KEYS[2], ARGV[1], 'PXAT', ARGV[2])
redis.call('SADD', KEYS[3], ARGV[3])
if redis.call('PEXPIRETIME', KEYS[3]) < tonumber(ARGV[2]) then
  redis.call('PEXPIREAT', KEYS[3], ARGV[2])
end
return 'rotated'
"#;

/// KEYS[1] subject set. ARGV[1] session key prefix. Returns how many flipped.
///
/// Reads the set inside the script, so a rotation either lands before it and
/// gets revoked, or runs after it against an already revoked token.
const REVOKE_ALL_SCRIPT: &str = r#"
local revoked = 0
for _, token in ipairs(redis.call('SMEMBERS', KEYS[1])) do
  local key = ARGV[1] .. token
  local raw = redis.call('GET', key)
  if raw then
    local session = cjson.decode(raw)
    if not session.revoked then
      session.revoked = true
      redis.call('SET', key, cjson.encode(session), 'KEEPTTL')
      revoked = revoked + 1
    end
  else
    redis.call('SREM', KEYS[1], token)
  end
end
return revoked
"#;

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: MultiplexedConnection,
    create_script: Arc<Script>,
    revoke_script: Arc<Script>,
    rotate_script: Arc<Script>,
    revoke_all_script: Arc<Script>,
}

impl std::fmt::Debug for RedisSessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisSessionStore").finish_non_exhaustive()
    }
}

impl RedisSessionStore {
    /// Connect to Redis (e.g., "redis://localhost:6379").
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| map_redis_error("open", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| map_redis_error("connect", e))?;
        Ok(Self {
            conn,
            create_script: Arc::new(Script::new(CREATE_SCRIPT)),
            revoke_script: Arc::new(Script::new(REVOKE_SCRIPT)),
            rotate_script: Arc::new(Script::new(ROTATE_SCRIPT)),
            revoke_all_script: Arc::new(Script::new(REVOKE_ALL_SCRIPT)),
        })
    }

    fn session_key(refresh_token: &str) -> String {
        format!("{SESSION_KEY_PREFIX}{refresh_token}")
    }

    fn subject_key(user: UserId) -> String {
        format!("{SUBJECT_KEY_PREFIX}{user}")
    }

    fn encode(session: &Session) -> Result<String, StoreError> {
        serde_json::to_string(session).map_err(|e| StoreError::Backend(format!("session serialization failed: {e}")))
    }

    fn decode(raw: &str) -> Result<Session, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt(format!("session record: {e}")))
    }

    async fn members(&self, user: UserId) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS")
            .arg(Self::subject_key(user))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("smembers", e))
    }
}

fn map_redis_error(operation: &str, err: RedisError) -> StoreError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
        StoreError::Unavailable(format!("redis unreachable in {operation}: {err}"))
    } else {
        StoreError::Backend(format!("redis error in {operation}: {err}"))
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    #[instrument(skip(self), err)]
    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("ping", e))?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply: {pong}")))
        }
    }

    /// The record and its subject index entry are written by one script, so a
    /// session is never live without being reachable from revoke-all.
    #[instrument(skip(self, session), fields(user_id = %session.user_id, session = session.fingerprint()), err)]
    async fn create(&self, session: &Session) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let created: i64 = self
            .create_script
            .key(Self::session_key(&session.refresh_token))
            .key(Self::subject_key(session.user_id))
            .arg(Self::encode(session)?)
            .arg(session.expires_at.timestamp_millis())
            .arg(&session.refresh_token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("create_session", e))?;
        if created == 0 {
            return Err(StoreError::Conflict("refresh token already in use".to_string()));
        }
        Ok(())
    }

    #[instrument(skip_all, err)]
    async fn get(&self, refresh_token: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(Self::session_key(refresh_token))
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("get_session", e))?;
        raw.as_deref().map(Self::decode).transpose()
    }

    #[instrument(skip_all, err)]
    async fn mark_revoked(&self, refresh_token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let flipped: i64 = self
            .revoke_script
            .key(Self::session_key(refresh_token))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("mark_revoked", e))?;
        Ok(flipped == 1)
    }

    #[instrument(skip_all, fields(user_id = %replacement.user_id), err)]
    async fn rotate(
        &self,
        old_refresh_token: &str,
        replacement: &Session,
        now: DateTime<Utc>,
    ) -> Result<RotateOutcome, StoreError> {
        // Expiry only moves one way, so checking it ahead of the swap is safe.
        match self.get(old_refresh_token).await? {
            None => return Ok(RotateOutcome::Missing),
            Some(old) if old.is_expired(now) => return Ok(RotateOutcome::Expired),
            Some(_) => {}
        }

        let mut conn = self.conn.clone();
        let outcome: String = self
            .rotate_script
            .key(Self::session_key(old_refresh_token))
            .key(Self::session_key(&replacement.refresh_token))
            .key(Self::subject_key(replacement.user_id))
            .arg(Self::encode(replacement)?)
            .arg(replacement.expires_at.timestamp_millis())
            .arg(&replacement.refresh_token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("rotate", e))?;

        match outcome.as_str() {
            "rotated" => Ok(RotateOutcome::Rotated),
            "revoked" => Ok(RotateOutcome::Revoked),
            "missing" => Ok(RotateOutcome::Missing),
            "conflict" => Err(StoreError::Conflict("refresh token already in use".to_string())),
            other => Err(StoreError::Backend(format!("unexpected rotate reply: {other}"))),
        }
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn revoke_all_for_subject(&self, user: UserId) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let revoked: u64 = self
            .revoke_all_script
            .key(Self::subject_key(user))
            .arg(SESSION_KEY_PREFIX)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("revoke_all_for_subject", e))?;
        Ok(revoked)
    }

    #[instrument(skip(self), fields(user_id = %user), err)]
    async fn list_live_for_subject(&self, user: UserId, now: DateTime<Utc>) -> Result<Vec<Session>, StoreError> {
        let mut live = Vec::new();
        let mut vanished = Vec::new();

        for token in self.members(user).await? {
            match self.get(&token).await? {
                Some(session) if session.is_live(now) => live.push(session),
                Some(_) => {}
                None => vanished.push(token),
            }
        }

        if !vanished.is_empty() {
            let mut conn = self.conn.clone();
            redis::cmd("SREM")
                .arg(Self::subject_key(user))
                .arg(&vanished)
                .query_async::<_, i64>(&mut conn)
                .await
                .map_err(|e| map_redis_error("prune_subject_index", e))?;
        }

        live.sort_by_key(|s| s.created_at);
        Ok(live)
    }

    /// Redis evicts expired records on its own.
    async fn purge_expired(&self, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use gatehouse_auth::ClientMeta;

    use super::*;

    async fn store() -> RedisSessionStore {
        let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for redis tests");
        RedisSessionStore::connect(url).await.unwrap()
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn revoked_records_stay_visible_until_expiry() {
        let store = store().await;
        let user = UserId::new();
        let old = Session::start(user, Duration::minutes(5), ClientMeta::default(), Utc::now());
        store.create(&old).await.unwrap();

        let new = Session::start(user, Duration::minutes(5), ClientMeta::default(), Utc::now());
        assert_eq!(
            store.rotate(&old.refresh_token, &new, Utc::now()).await.unwrap(),
            RotateOutcome::Rotated
        );
        assert_eq!(
            store.rotate(&old.refresh_token, &new, Utc::now()).await.unwrap(),
            RotateOutcome::Revoked
        );
        assert!(store.get(&old.refresh_token).await.unwrap().unwrap().revoked);

        assert_eq!(store.revoke_all_for_subject(user).await.unwrap(), 1);
        assert!(store.list_live_for_subject(user, Utc::now()).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn create_indexes_the_session_atomically() {
        let store = store().await;
        let user = UserId::new();
        let session = Session::start(user, Duration::minutes(5), ClientMeta::default(), Utc::now());
        store.create(&session).await.unwrap();

        let err = store.create(&session).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.members(user).await.unwrap(), vec![session.refresh_token.clone()]);
        assert_eq!(store.revoke_all_for_subject(user).await.unwrap(), 1);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL"]
    async fn logout_racing_refresh_leaves_nothing_live() {
        let store = store().await;
        let user = UserId::new();

        for _ in 0..20 {
            let current = Session::start(user, Duration::minutes(5), ClientMeta::default(), Utc::now());
            store.create(&current).await.unwrap();
            let replacement = Session::start(user, Duration::minutes(5), ClientMeta::default(), Utc::now());

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
