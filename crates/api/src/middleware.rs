//! Per-request authentication and route-level authorization.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn};

use gatehouse_auth::{Action, AuthenticatedSubject, Capability, Resource, UnmappedRoutePolicy, authorize};

use crate::app::errors;
use crate::app::services::AppServices;

/// Routes that only require a valid token, whatever the unmapped-route policy.
///
/// The RBAC admin routes run their own explicit checks.
const AUTHENTICATED_ONLY: &[&str] = &["/api/whoami", "/api/sessions", "/api/auth/logout", "/api/admin/rbac"];

#[derive(Clone)]
pub struct AuthState {
    pub services: Arc<AppServices>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Ok(token) = extract_bearer(req.headers()) else {
        return errors::unauthenticated();
    };
    let claims = match state.services.lifecycle.verify_access_token(token) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(reason = e.code(), "bearer token rejected");
            return errors::unauthenticated();
        }
    };

    let path = req.uri().path().to_string();
    let capability = state.services.routes.resolve(req.method().as_str(), &path);

    // Also needed for the role set on allowed, unmapped routes.
    let grants = match state.services.engine.grants(claims.sub).await {
        Ok(grants) => grants,
        Err(e) => return errors::auth_error_to_response(e),
    };

    match capability {
        Some(capability) if !authorize::check(&grants, capability) => {
            warn!(user_id = %claims.sub, %capability, path = %path, "request forbidden");
            return errors::forbidden(format!("missing permission {capability}"));
        }
        Some(_) => {}
        None if is_authenticated_only(&path) => {}
        None => {
            if state.services.unmapped_route_policy == UnmappedRoutePolicy::DefaultDeny {
                warn!(user_id = %claims.sub, path = %path, "unmapped route denied");
                return errors::forbidden("route is not mapped to a permission");
            }
        }
    }

    req.extensions_mut().insert(AuthenticatedSubject {
        id: claims.sub,
        display_name: claims.name,
        token_role: claims.role,
        roles: grants.role_names(),
    });

    next.run(req).await
}

/// Explicit in-handler gate for routes the route table does not cover.
///
/// Reads the grants afresh, so mutations made earlier in the same request
/// sequence are visible.
pub async fn require_permission(
    services: &AppServices,
    subject: &AuthenticatedSubject,
    resource: Resource,
    action: Action,
) -> Result<(), Response> {
    match services.engine.check(subject.id, resource, action).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            let capability = Capability::new(resource, action);
            warn!(user_id = %subject.id, %capability, "request forbidden");
            Err(errors::forbidden(format!("missing permission {capability}")))
        }
        Err(e) => Err(errors::auth_error_to_response(e)),
    }
}

fn is_authenticated_only(path: &str) -> bool {
    AUTHENTICATED_ONLY
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{prefix}/")))
}

pub(crate) fn extract_bearer(headers: &HeaderMap) -> Result<&str, StatusCode> {
    let header = headers
        .get(axum::http::header::AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let header = header.to_str().map_err(|_| StatusCode::UNAUTHORIZED)?;

    let header = header
        .strip_prefix("Bearer ")
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(token)
}
