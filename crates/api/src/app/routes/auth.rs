//! Register, login, refresh and logout.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::post,
};
use serde_json::json;

use gatehouse_auth::Registration;

use crate::app::dto::{LoginRequest, RefreshRequest};
use crate::app::{errors, services::AppServices};
use crate::context::client_meta;
use crate::middleware::extract_bearer;

type Peer = Option<ConnectInfo<SocketAddr>>;

/// Endpoints reachable without a token.
pub fn public_router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh))
}

/// POST /api/auth/register
pub async fn register(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Peer,
    headers: HeaderMap,
    Json(body): Json<Registration>,
) -> axum::response::Response {
    let meta = client_meta(&headers, peer.map(|ConnectInfo(addr)| addr));
    match services.lifecycle.register(&body, meta).await {
        Ok(outcome) => (StatusCode::CREATED, Json(outcome)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /api/auth/login
pub async fn login(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Peer,
    headers: HeaderMap,
    Json(body): Json<LoginRequest>,
) -> axum::response::Response {
    let meta = client_meta(&headers, peer.map(|ConnectInfo(addr)| addr));
    match services.lifecycle.login(&body.email, &body.password, meta).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /api/auth/refresh
///
/// The presented refresh token is spent whether or not the caller receives
/// the response.
pub async fn refresh(
    Extension(services): Extension<Arc<AppServices>>,
    peer: Peer,
    headers: HeaderMap,
    Json(body): Json<RefreshRequest>,
) -> axum::response::Response {
    let meta = client_meta(&headers, peer.map(|ConnectInfo(addr)| addr));
    match services.lifecycle.refresh(&body.refresh_token, meta).await {
        Ok(tokens) => (StatusCode::OK, Json(tokens)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// POST /api/auth/logout: revokes every session of the caller.
pub async fn logout(Extension(services): Extension<Arc<AppServices>>, headers: HeaderMap) -> axum::response::Response {
    let Ok(token) = extract_bearer(&headers) else {
        return errors::unauthenticated();
    };
    match services.lifecycle.logout(token).await {
        Ok(revoked) => (StatusCode::OK, Json(json!({ "revoked": revoked }))).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}
