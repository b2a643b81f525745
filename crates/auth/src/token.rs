//! Token Codec: signs and verifies short-lived HS256 access tokens.
//!
//! Stateless apart from the key material it was constructed with. Replacing
//! the secret invalidates every outstanding token immediately.

use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use gatehouse_core::UserId;

use crate::claims::{AccessClaims, TokenValidationError, validate_claims};
use crate::{AuthConfig, AuthError};

/// A freshly signed access token together with the claims it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub claims: AccessClaims,
}

#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: chrono::Duration,
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec").field("ttl", &self.ttl).finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec over a shared secret.
    ///
    /// An empty secret means there is no signing key: [`AuthError::Signing`].
    pub fn new(secret: &[u8], ttl: Duration) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Signing("signing key unavailable".to_string()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| AuthError::Signing(format!("invalid token ttl: {e}")))?;

        // Expiry is checked by `validate_claims` at millisecond precision.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            ttl,
        })
    }

    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        Self::new(config.jwt_secret.as_bytes(), config.access_token_ttl)
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    pub fn issue(&self, subject: UserId, display_name: &str, primary_role: &str) -> Result<IssuedToken, AuthError> {
        self.issue_at(subject, display_name, primary_role, Utc::now())
    }

    pub fn issue_at(
        &self,
        subject: UserId,
        display_name: &str,
        primary_role: &str,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AuthError> {
        let claims = AccessClaims {
            sub: subject,
            name: display_name.to_string(),
            role: primary_role.to_string(),
            issued_at: now,
            expires_at: now + self.ttl,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Signing(e.to_string()))?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature and expiry.
    ///
    /// `ExpiredToken` means "refresh and retry"; `InvalidToken` means the
    /// token was never ours (or was tampered with) and the client must log in.
    pub fn verify(&self, token: &str) -> Result<AccessClaims, AuthError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, AuthError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|_| AuthError::InvalidToken)?;

        match validate_claims(&data.claims, now) {
            Ok(()) => Ok(data.claims),
            Err(TokenValidationError::Expired) => Err(AuthError::ExpiredToken),
            Err(TokenValidationError::NotYetValid | TokenValidationError::InvalidTimeWindow) => {
                Err(AuthError::InvalidToken)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec(ttl: Duration) -> TokenCodec {
        TokenCodec::new(b"test-secret-that-is-long-enough-123", ttl).unwrap()
    }

    #[test]
    fn issue_then_verify_returns_claims() {
        let codec = codec(Duration::from_secs(900));
        let subject = UserId::new();
        let issued = codec.issue(subject, "alice", "editor").unwrap();

        let claims = codec.verify(&issued.token).unwrap();
        assert_eq!(claims.sub, subject);
        assert_eq!(claims.name, "alice");
        assert_eq!(claims.role, "editor");
        assert_eq!(claims, issued.claims);
    }

    #[test]
    fn expired_token_is_distinguished_from_invalid() {
        let codec = codec(Duration::from_millis(1));
        let issued = codec.issue(UserId::new(), "alice", "user").unwrap();
        std::thread::sleep(Duration::from_millis(10));

        assert_eq!(codec.verify(&issued.token), Err(AuthError::ExpiredToken));
    }

    #[test]
    fn foreign_signature_is_invalid() {
        let ours = codec(Duration::from_secs(900));
        let theirs = TokenCodec::new(b"some-other-secret-entirely-000000", Duration::from_secs(900)).unwrap();
        let issued = theirs.issue(UserId::new(), "mallory", "admin").unwrap();

        assert_eq!(ours.verify(&issued.token), Err(AuthError::InvalidToken));
    }

    #[test]
    fn garbage_is_invalid() {
        let codec = codec(Duration::from_secs(900));
        assert_eq!(codec.verify("not.a.jwt"), Err(AuthError::InvalidToken));
        assert_eq!(codec.verify(""), Err(AuthError::InvalidToken));
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let codec = codec(Duration::from_secs(900));
        let issued = codec.issue(UserId::new(), "alice", "user").unwrap();
        let mut parts: Vec<String> = issued.token.split('.').map(str::to_string).collect();
        let other = codec.issue(UserId::new(), "eve", "admin").unwrap();
        parts[1] = other.token.split('.').nth(1).unwrap().to_string();

        assert_eq!(codec.verify(&parts.join(".")), Err(AuthError::InvalidToken));
    }

    #[test]
    fn empty_secret_is_a_signing_error() {
        let err = TokenCodec::new(b"", Duration::from_secs(60)).unwrap_err();
        assert!(matches!(err, AuthError::Signing(_)));
    }
}
