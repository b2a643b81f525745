//! Refresh sessions.
//!
//! A session moves `active -> revoked` only. Expiry is evaluated lazily when a
//! session is looked up; nothing ever brings a revoked or expired refresh
//! token back.

use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use gatehouse_core::UserId;

use crate::AuthError;

/// Entropy of a refresh token identifier in bytes.
pub const REFRESH_TOKEN_BYTES: usize = 32;

/// Generate an opaque refresh-token identifier from the OS CSPRNG.
pub fn generate_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Where a login/refresh came from. Recorded for audit only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn new(ip_address: Option<String>, user_agent: Option<String>) -> Self {
        Self {
            ip_address,
            user_agent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    /// Opaque, unique refresh-token identifier (the lookup key).
    pub refresh_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl Session {
    /// Start a new session with a freshly generated refresh token.
    pub fn start(user_id: UserId, ttl: Duration, meta: ClientMeta, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            refresh_token: generate_refresh_token(),
            created_at: now,
            expires_at: now + ttl,
            revoked: false,
            ip_address: meta.ip_address,
            user_agent: meta.user_agent,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Neither revoked nor expired, i.e. usable for a refresh.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }

    /// Gate a refresh attempt: revoked wins over expired.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        if self.revoked {
            return Err(AuthError::RevokedSession);
        }
        if self.is_expired(now) {
            return Err(AuthError::ExpiredSession);
        }
        Ok(())
    }

    /// Short, non-secret handle for listing sessions without exposing the token.
    pub fn fingerprint(&self) -> &str {
        let end = self.refresh_token.len().min(8);
        &self.refresh_token[..end]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_unique_hex() {
        let a = generate_refresh_token();
        let b = generate_refresh_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), REFRESH_TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn revoked_takes_precedence_over_expired() {
        let now = Utc::now();
        let mut s = Session::start(UserId::new(), Duration::seconds(1), ClientMeta::default(), now);
        let later = now + Duration::seconds(5);
        assert_eq!(s.ensure_usable(later), Err(AuthError::ExpiredSession));

        s.revoked = true;
        assert_eq!(s.ensure_usable(later), Err(AuthError::RevokedSession));
        assert_eq!(s.ensure_usable(now), Err(AuthError::RevokedSession));
    }

    #[test]
    fn expiry_is_strictly_after_deadline() {
        let now = Utc::now();
        let s = Session::start(UserId::new(), Duration::days(7), ClientMeta::default(), now);
        assert!(s.is_live(now));
        assert!(!s.is_expired(s.expires_at));
        assert!(s.is_expired(s.expires_at + Duration::milliseconds(1)));
    }
}
