use axum::{
    Router,
    routing::{get, post},
};

pub mod auth;
pub mod common;
pub mod rbac;
pub mod system;
pub mod users;

/// Router for endpoints reachable without a token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .nest("/api/auth", auth::public_router())
}

/// Router for all authenticated endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/api/whoami", get(system::whoami))
        .route("/api/sessions", get(system::sessions))
        .route("/api/auth/logout", post(auth::logout))
        .nest("/api/admin/rbac", rbac::router())
        .nest("/api/admin/users", users::admin_router())
        .nest("/api/vf/v1", users::profile_router())
}
