//! Role and permission administration, plus audit endpoints.
//!
//! Reads require `user.read`, mutations `user.manage`. These paths are not in
//! the route table, so every handler performs its own check.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, put},
};
use serde_json::json;

use gatehouse_auth::{Action, AuthenticatedSubject, Capability, PermissionSpec, Resource};
use gatehouse_core::{PermissionId, RoleId, UserId};

use crate::app::dto::{
    AssignRoleRequest, CreateRoleRequest, DirectGrantRequest, ExplainQuery, PermissionQuery, RolePermissionRequest,
    UpdateRoleRequest,
};
use crate::app::routes::common::parse_id;
use crate::app::{errors, services::AppServices};
use crate::middleware::require_permission;

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

pub fn router() -> Router {
    Router::new()
        .route("/roles", get(list_roles).post(create_role))
        .route("/roles/:role_id", get(get_role).put(update_role).delete(delete_role))
        .route("/roles/:role_id/permissions", get(role_permissions).post(add_role_permission))
        .route("/roles/:role_id/permissions/:permission_id", delete(remove_role_permission))
        .route("/permissions", get(list_permissions).post(create_permission))
        .route("/permissions/:permission_id", get(get_permission))
        .route("/subjects/:user_id/roles", get(subject_roles).post(assign_role))
        .route("/subjects/:user_id/roles/:role_id", delete(remove_role))
        .route("/subjects/:user_id/grants", put(grant_direct))
        .route("/subjects/:user_id/grants/:permission_id", delete(revoke_direct))
        .route("/subjects/:user_id/permissions", get(subject_permissions))
        .route("/subjects/:user_id/explain", get(explain_subject))
        .route("/explain", get(explain_self))
        .route("/stats", get(permission_stats))
}

type Services = Extension<Arc<AppServices>>;
type Caller = Extension<AuthenticatedSubject>;

macro_rules! try_response {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(res) => return res,
        }
    };
}

macro_rules! try_auth {
    ($e:expr) => {
        match $e {
            Ok(v) => v,
            Err(e) => return errors::auth_error_to_response(e),
        }
    };
}

async fn can_read(services: &AppServices, caller: &AuthenticatedSubject) -> Result<(), axum::response::Response> {
    require_permission(services, caller, Resource::User, Action::Read).await
}

async fn can_manage(services: &AppServices, caller: &AuthenticatedSubject) -> Result<(), axum::response::Response> {
    require_permission(services, caller, Resource::User, Action::Manage).await
}

fn parse_capability(query: &ExplainQuery) -> Result<Capability, axum::response::Response> {
    Capability::parse(&query.resource, &query.action).map_err(errors::auth_error_to_response)
}

/// GET /api/admin/rbac/stats
pub async fn permission_stats(Extension(services): Services, Extension(caller): Caller) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let stats = try_auth!(services.engine.permission_stats().await);
    (StatusCode::OK, Json(stats)).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Roles
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/admin/rbac/roles
pub async fn list_roles(Extension(services): Services, Extension(caller): Caller) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let roles = try_auth!(services.engine.list_roles().await);
    (StatusCode::OK, Json(json!({ "roles": roles }))).into_response()
}

/// POST /api/admin/rbac/roles
pub async fn create_role(
    Extension(services): Services,
    Extension(caller): Caller,
    Json(body): Json<CreateRoleRequest>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let role = try_auth!(services.engine.create_role(&body.name, &body.description).await);
    (StatusCode::CREATED, Json(json!({ "role": role }))).into_response()
}

/// GET /api/admin/rbac/roles/:role_id
pub async fn get_role(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(role_id): Path<String>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    let role = try_auth!(services.engine.get_role(role_id).await);
    (StatusCode::OK, Json(json!({ "role": role }))).into_response()
}

/// PUT /api/admin/rbac/roles/:role_id
pub async fn update_role(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(role_id): Path<String>,
    Json(body): Json<UpdateRoleRequest>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    let role = try_auth!(
        services
            .engine
            .update_role(role_id, body.name.as_deref(), body.description.as_deref())
            .await
    );
    (StatusCode::OK, Json(json!({ "role": role }))).into_response()
}

/// DELETE /api/admin/rbac/roles/:role_id: refused while anyone holds the role.
pub async fn delete_role(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(role_id): Path<String>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    try_auth!(services.engine.delete_role(role_id).await);
    StatusCode::NO_CONTENT.into_response()
}

/// GET /api/admin/rbac/roles/:role_id/permissions
pub async fn role_permissions(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(role_id): Path<String>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    let permissions = try_auth!(services.engine.role_permissions(role_id).await);
    (StatusCode::OK, Json(json!({ "permissions": permissions }))).into_response()
}

/// POST /api/admin/rbac/roles/:role_id/permissions
pub async fn add_role_permission(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(role_id): Path<String>,
    Json(body): Json<RolePermissionRequest>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    try_auth!(services.engine.add_role_permission(role_id, body.permission_id).await);
    StatusCode::NO_CONTENT.into_response()
}

/// DELETE /api/admin/rbac/roles/:role_id/permissions/:permission_id
pub async fn remove_role_permission(
    Extension(services): Services,
    Extension(caller): Caller,
    Path((role_id, permission_id)): Path<(String, String)>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    let permission_id: PermissionId = try_response!(parse_id(&permission_id, "permission"));
    try_auth!(services.engine.remove_role_permission(role_id, permission_id).await);
    StatusCode::NO_CONTENT.into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Permissions
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/admin/rbac/permissions?resource=&action=
pub async fn list_permissions(
    Extension(services): Services,
    Extension(caller): Caller,
    Query(query): Query<PermissionQuery>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let permissions = try_auth!(services.engine.list_permissions(query.into()).await);
    (StatusCode::OK, Json(json!({ "permissions": permissions }))).into_response()
}

/// POST /api/admin/rbac/permissions
pub async fn create_permission(
    Extension(services): Services,
    Extension(caller): Caller,
    Json(body): Json<PermissionSpec>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let permission = try_auth!(services.engine.create_permission(&body).await);
    (StatusCode::CREATED, Json(json!({ "permission": permission }))).into_response()
}

/// GET /api/admin/rbac/permissions/:permission_id
pub async fn get_permission(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(permission_id): Path<String>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let permission_id: PermissionId = try_response!(parse_id(&permission_id, "permission"));
    let permission = try_auth!(services.engine.get_permission(permission_id).await);
    (StatusCode::OK, Json(json!({ "permission": permission }))).into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Subject assignments and grants
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/admin/rbac/subjects/:user_id/roles
pub async fn subject_roles(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    let roles = try_auth!(services.engine.subject_roles(user_id).await);
    (StatusCode::OK, Json(json!({ "roles": roles }))).into_response()
}

/// POST /api/admin/rbac/subjects/:user_id/roles
pub async fn assign_role(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(user_id): Path<String>,
    Json(body): Json<AssignRoleRequest>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    try_auth!(services.engine.assign_role(user_id, body.role_id).await);
    StatusCode::NO_CONTENT.into_response()
}

/// DELETE /api/admin/rbac/subjects/:user_id/roles/:role_id
pub async fn remove_role(
    Extension(services): Services,
    Extension(caller): Caller,
    Path((user_id, role_id)): Path<(String, String)>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    let role_id: RoleId = try_response!(parse_id(&role_id, "role"));
    try_auth!(services.engine.remove_role(user_id, role_id).await);
    StatusCode::NO_CONTENT.into_response()
}

/// PUT /api/admin/rbac/subjects/:user_id/grants
///
/// Upsert: a later call for the same permission overwrites `is_denied`.
pub async fn grant_direct(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(user_id): Path<String>,
    Json(body): Json<DirectGrantRequest>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    try_auth!(
        services
            .engine
            .grant_direct(user_id, body.permission_id, body.is_denied)
            .await
    );
    StatusCode::NO_CONTENT.into_response()
}

/// DELETE /api/admin/rbac/subjects/:user_id/grants/:permission_id
pub async fn revoke_direct(
    Extension(services): Services,
    Extension(caller): Caller,
    Path((user_id, permission_id)): Path<(String, String)>,
) -> axum::response::Response {
    try_response!(can_manage(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    let permission_id: PermissionId = try_response!(parse_id(&permission_id, "permission"));
    try_auth!(services.engine.revoke_direct(user_id, permission_id).await);
    StatusCode::NO_CONTENT.into_response()
}

// ─────────────────────────────────────────────────────────────────────────────
// Audit
// ─────────────────────────────────────────────────────────────────────────────

/// GET /api/admin/rbac/subjects/:user_id/permissions
pub async fn subject_permissions(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(user_id): Path<String>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    let effective = try_auth!(services.engine.effective_permissions(user_id).await);
    let by_role = try_auth!(services.engine.subject_role_permissions(user_id).await);
    (
        StatusCode::OK,
        Json(json!({
            "user_id": user_id,
            "effective": effective.into_vec(),
            "by_role": by_role,
        })),
    )
        .into_response()
}

/// GET /api/admin/rbac/subjects/:user_id/explain?resource=&action=
pub async fn explain_subject(
    Extension(services): Services,
    Extension(caller): Caller,
    Path(user_id): Path<String>,
    Query(query): Query<ExplainQuery>,
) -> axum::response::Response {
    try_response!(can_read(&services, &caller).await);
    let user_id: UserId = try_response!(parse_id(&user_id, "user"));
    let capability = try_response!(parse_capability(&query));
    let explanation = try_auth!(
        services
            .engine
            .explain(user_id, capability.resource, capability.action)
            .await
    );
    (StatusCode::OK, Json(json!({ "explanation": explanation }))).into_response()
}

/// GET /api/admin/rbac/explain?resource=&action=
///
/// Any authenticated caller may ask about their own access.
pub async fn explain_self(
    Extension(services): Services,
    Extension(caller): Caller,
    Query(query): Query<ExplainQuery>,
) -> axum::response::Response {
    let capability = try_response!(parse_capability(&query));
    let explanation = try_auth!(
        services
            .engine
            .explain(caller.id, capability.resource, capability.action)
            .await
    );
    (StatusCode::OK, Json(json!({ "explanation": explanation }))).into_response()
}
