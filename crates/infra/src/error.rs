use thiserror::Error;

use gatehouse_auth::AuthError;

/// Failure reported by a store adapter.
///
/// Adapters never decide what a conflict means to the caller; services map
/// [`StoreError::Conflict`] to the domain error that fits the operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend unreachable or the call exceeded its time bound.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or referential constraint rejected the write.
    #[error("conflicting write: {0}")]
    Conflict(String),

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn poisoned() -> Self {
        Self::Backend("lock poisoned".to_string())
    }
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => AuthError::Validation(format!("conflicting write: {msg}")),
            other => AuthError::StoreUnavailable(other.to_string()),
        }
    }
}
