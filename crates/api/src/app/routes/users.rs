//! Account endpoints gated purely by the route table.
//!
//! `/api/admin/users/...` resolves to the `user` resource and
//! `/api/vf/v1/profile` to `profile`; the action follows the HTTP method, so
//! listing needs `user.read` and deletion `user.delete`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, put},
};
use serde_json::json;

use gatehouse_auth::AuthenticatedSubject;
use gatehouse_core::UserId;

use crate::app::dto::{PageQuery, SetStatusRequest};
use crate::app::routes::common::parse_id;
use crate::app::{errors, services::AppServices};

pub fn admin_router() -> Router {
    Router::new()
        .route("/", get(list_users))
        .route("/:user_id", get(get_user).delete(delete_user))
        .route("/:user_id/status", put(set_status))
        .route("/:user_id/sessions", delete(revoke_sessions))
}

pub fn profile_router() -> Router {
    Router::new().route("/profile", get(profile))
}

/// GET /api/admin/users?limit=&offset=
pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Query(page): Query<PageQuery>,
) -> axum::response::Response {
    match services.lifecycle.list_subjects(page.limit(), page.offset()).await {
        Ok(page) => (StatusCode::OK, Json(page)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /api/admin/users/:user_id
pub async fn get_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match parse_id(&user_id, "user") {
        Ok(id) => id,
        Err(res) => return res,
    };
    let subject = match services.lifecycle.find_subject(user_id).await {
        Ok(Some(subject)) => subject,
        Ok(None) => return errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => return errors::auth_error_to_response(e),
    };
    let roles = match services.engine.subject_roles(user_id).await {
        Ok(roles) => roles,
        Err(e) => return errors::auth_error_to_response(e),
    };

    let role_names: Vec<&str> = roles.iter().map(|r| r.name.as_str()).collect();
    (StatusCode::OK, Json(json!({ "user": subject, "roles": role_names }))).into_response()
}

/// PUT /api/admin/users/:user_id/status
///
/// Disabling or banning an account revokes all of its sessions.
pub async fn set_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
    Json(body): Json<SetStatusRequest>,
) -> axum::response::Response {
    let user_id: UserId = match parse_id(&user_id, "user") {
        Ok(id) => id,
        Err(res) => return res,
    };
    match services.lifecycle.set_status(user_id, body.status).await {
        Ok(subject) => (StatusCode::OK, Json(json!({ "user": subject }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// DELETE /api/admin/users/:user_id
///
/// Soft delete: the account stays on record, its sessions are revoked and
/// it can no longer log in.
pub async fn delete_user(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match parse_id(&user_id, "user") {
        Ok(id) => id,
        Err(res) => return res,
    };
    match services.lifecycle.delete_subject(user_id).await {
        Ok(revoked) => (StatusCode::OK, Json(json!({ "deleted": true, "revoked": revoked }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// DELETE /api/admin/users/:user_id/sessions
pub async fn revoke_sessions(
    Extension(services): Extension<Arc<AppServices>>,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    let user_id: UserId = match parse_id(&user_id, "user") {
        Ok(id) => id,
        Err(res) => return res,
    };
    match services.lifecycle.revoke_all(user_id).await {
        Ok(revoked) => (StatusCode::OK, Json(json!({ "revoked": revoked }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// GET /api/vf/v1/profile: the caller's own account.
pub async fn profile(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<AuthenticatedSubject>,
) -> axum::response::Response {
    match services.lifecycle.find_subject(subject.id).await {
        Ok(Some(account)) => (
            StatusCode::OK,
            Json(json!({ "user": account, "roles": subject.roles })),
        )
            .into_response(),
        Ok(None) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "user not found"),
        Err(e) => errors::auth_error_to_response(e),
    }
}
