//! Request/response bodies that are not domain types themselves.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gatehouse_auth::{Action, Resource, Session, SubjectStatus};
use gatehouse_core::{PermissionId, RoleId};
use gatehouse_infra::PermissionFilter;

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// A session as listed to its owner: the refresh token is reduced to a fingerprint.
#[derive(Debug, Serialize)]
pub struct SessionView {
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl From<&Session> for SessionView {
    fn from(s: &Session) -> Self {
        Self {
            fingerprint: s.fingerprint().to_string(),
            created_at: s.created_at,
            expires_at: s.expires_at,
            ip_address: s.ip_address.clone(),
            user_agent: s.user_agent.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RBAC administration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RolePermissionRequest {
    pub permission_id: PermissionId,
}

#[derive(Debug, Deserialize)]
pub struct AssignRoleRequest {
    pub role_id: RoleId,
}

#[derive(Debug, Deserialize)]
pub struct DirectGrantRequest {
    pub permission_id: PermissionId,
    #[serde(default)]
    pub is_denied: bool,
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// `?limit=&offset=` for the user listing; the limit is clamped to 1..=100.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<u32>,
    pub offset: Option<u64>,
}

impl PageQuery {
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0)
    }
}

#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: SubjectStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct PermissionQuery {
    pub resource: Option<Resource>,
    pub action: Option<Action>,
}

impl From<PermissionQuery> for PermissionFilter {
    fn from(q: PermissionQuery) -> Self {
        PermissionFilter {
            resource: q.resource,
            action: q.action,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ExplainQuery {
    pub resource: String,
    pub action: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_limit_is_clamped() {
        assert_eq!(PageQuery::default().limit(), DEFAULT_PAGE_LIMIT);
        let huge = PageQuery {
            limit: Some(10_000),
            offset: Some(40),
        };
        assert_eq!(huge.limit(), MAX_PAGE_LIMIT);
        assert_eq!(huge.offset(), 40);
        assert_eq!(PageQuery { limit: Some(0), offset: None }.limit(), 1);
    }
}
