//! Input errors raised before anything reaches a store.

use thiserror::Error;

/// A rejected input value, tagged with the field it came from.
///
/// Storage faults and authorization outcomes live in `gatehouse-infra` and
/// `gatehouse-auth`; this type only describes bad input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("malformed {kind}: {reason}")]
    MalformedId { kind: &'static str, reason: String },
}

impl DomainError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }

    pub fn malformed_id(kind: &'static str, reason: impl core::fmt::Display) -> Self {
        Self::MalformedId {
            kind,
            reason: reason.to_string(),
        }
    }

    /// The offending field, or the id kind for malformed identifiers.
    pub fn field(&self) -> &'static str {
        match self {
            Self::Invalid { field, .. } => field,
            Self::MalformedId { kind, .. } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_names_the_field() {
        let err = DomainError::invalid("email", "invalid format");
        assert_eq!(err.to_string(), "email: invalid format");
        assert_eq!(err.field(), "email");
    }
}
