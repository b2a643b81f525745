//! Subjects (user accounts) as seen by the authorization core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_core::{DomainError, UserId};

pub const USERNAME_MIN_LEN: usize = 3;
pub const USERNAME_MAX_LEN: usize = 20;
pub const PASSWORD_MIN_LEN: usize = 6;
/// bcrypt reads at most this many bytes of input.
pub const PASSWORD_MAX_BYTES: usize = 72;

/// Account status. Only `Active` subjects may authenticate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubjectStatus {
    #[default]
    Active,
    Inactive,
    Banned,
}

impl SubjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubjectStatus::Active => "active",
            SubjectStatus::Inactive => "inactive",
            SubjectStatus::Banned => "banned",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SubjectStatus::Active)
    }
}

impl core::fmt::Display for SubjectStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for SubjectStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SubjectStatus::Active),
            "inactive" => Ok(SubjectStatus::Inactive),
            "banned" => Ok(SubjectStatus::Banned),
            other => Err(DomainError::invalid("status", format!("unknown status '{other}'"))),
        }
    }
}

/// A stored account.
///
/// Never hard-deleted: deletion stamps `deleted_at`, which keeps the email
/// and username reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: UserId,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub status: SubjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Subject {
    /// Name carried in access tokens.
    pub fn display_name(&self) -> &str {
        &self.username
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Unvalidated registration input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Registration input after validation and normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidRegistration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Registration {
    pub fn new(
        username: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<ValidRegistration, DomainError> {
        let username = self.username.trim();
        let len = username.chars().count();
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&len) {
            return Err(DomainError::invalid(
                "username",
                format!("must be {USERNAME_MIN_LEN}-{USERNAME_MAX_LEN} characters"),
            ));
        }

        let email = normalize_email(&self.email);
        if !is_plausible_email(&email) {
            return Err(DomainError::invalid("email", "invalid format"));
        }

        if self.password.chars().count() < PASSWORD_MIN_LEN {
            return Err(DomainError::invalid(
                "password",
                format!("must be at least {PASSWORD_MIN_LEN} characters"),
            ));
        }
        if self.password.len() > PASSWORD_MAX_BYTES {
            return Err(DomainError::invalid(
                "password",
                format!("must be at most {PASSWORD_MAX_BYTES} bytes"),
            ));
        }

        Ok(ValidRegistration {
            username: username.to_string(),
            email,
            password: self.password.clone(),
        })
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
}
