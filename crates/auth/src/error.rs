//! Error taxonomy for the authorization and session core.

use thiserror::Error;

use gatehouse_core::DomainError;

/// Every failure the core can report.
///
/// Absence of a permission is not represented here: `Check` answers `false`
/// for that. Only [`AuthError::StoreUnavailable`] may be retried by a caller.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown email or wrong password. Deliberately identical for both.
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("unknown session")]
    UnknownSession,

    #[error("session has been revoked")]
    RevokedSession,

    #[error("session has expired")]
    ExpiredSession,

    #[error("access token has expired")]
    ExpiredToken,

    #[error("access token is invalid")]
    InvalidToken,

    /// The signing key is missing or the token could not be encoded.
    #[error("token signing failed: {0}")]
    Signing(String),

    /// Password hashing or verification failed (not a credential mismatch).
    #[error("password hashing failed: {0}")]
    Hashing(String),

    /// Refresh rotation failed after the old session may already have been
    /// revoked. The client has to log in again.
    #[error("session rotation aborted; re-authentication required")]
    RotationAborted,

    #[error("role already assigned to subject")]
    DuplicateAssignment,

    #[error("role is still held by {holders} subject(s)")]
    RoleInUse { holders: u64 },

    #[error("invalid permission spec: {0}")]
    InvalidPermissionSpec(String),

    #[error("email or username already registered")]
    DuplicateSubject,

    #[error("role '{0}' already exists")]
    DuplicateRole(String),

    #[error("permission '{0}' already exists")]
    DuplicatePermission(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("validation failed: {0}")]
    Validation(String),

    /// The backing store timed out or failed. Never an authorization denial.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Coarse response class an error maps to at the request boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorClass {
    Unauthenticated,
    Forbidden,
    Conflict,
    BadRequest,
    NotFound,
    Internal,
}

impl AuthError {
    pub fn store(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Only store faults can succeed on a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidCredentials
            | Self::UnknownSession
            | Self::RevokedSession
            | Self::ExpiredSession
            | Self::ExpiredToken
            | Self::InvalidToken
            | Self::RotationAborted => ErrorClass::Unauthenticated,
            Self::AccountDisabled => ErrorClass::Forbidden,
            Self::DuplicateAssignment
            | Self::RoleInUse { .. }
            | Self::DuplicateSubject
            | Self::DuplicateRole(_)
            | Self::DuplicatePermission(_) => ErrorClass::Conflict,
            Self::InvalidPermissionSpec(_) | Self::Validation(_) => ErrorClass::BadRequest,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::Signing(_) | Self::Hashing(_) | Self::StoreUnavailable(_) => ErrorClass::Internal,
        }
    }

    /// Stable machine-readable code for response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::AccountDisabled => "account_disabled",
            Self::UnknownSession => "unknown_session",
            Self::RevokedSession => "revoked_session",
            Self::ExpiredSession => "expired_session",
            Self::ExpiredToken => "expired_token",
            Self::InvalidToken => "invalid_token",
            Self::Signing(_) => "signing_error",
            Self::Hashing(_) => "hashing_error",
            Self::RotationAborted => "rotation_aborted",
            Self::DuplicateAssignment => "duplicate_assignment",
            Self::RoleInUse { .. } => "role_in_use",
            Self::InvalidPermissionSpec(_) => "invalid_permission_spec",
            Self::DuplicateSubject => "duplicate_subject",
            Self::DuplicateRole(_) => "duplicate_role",
            Self::DuplicatePermission(_) => "duplicate_permission",
            Self::NotFound(_) => "not_found",
            Self::Validation(_) => "validation_error",
            Self::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<DomainError> for AuthError {
    fn from(value: DomainError) -> Self {
        Self::Validation(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_faults_are_retryable() {
        assert!(AuthError::store("timeout").is_retryable());
        assert!(!AuthError::InvalidCredentials.is_retryable());
        assert!(!AuthError::RevokedSession.is_retryable());
        assert!(!AuthError::RotationAborted.is_retryable());
    }

    #[test]
    fn store_outage_is_internal_not_forbidden() {
        assert_eq!(AuthError::store("down").class(), ErrorClass::Internal);
    }

    #[test]
    fn token_and_session_failures_are_unauthenticated() {
        for err in [
            AuthError::ExpiredToken,
            AuthError::InvalidToken,
            AuthError::RevokedSession,
            AuthError::UnknownSession,
            AuthError::ExpiredSession,
        ] {
            assert_eq!(err.class(), ErrorClass::Unauthenticated, "{err}");
        }
    }
}
