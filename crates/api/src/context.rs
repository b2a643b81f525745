//! Request-scoped data pulled from headers before reaching the services.

use std::net::SocketAddr;

use axum::http::HeaderMap;
use axum::http::header::USER_AGENT;

use gatehouse_auth::ClientMeta;

const FORWARDED_FOR: &str = "x-forwarded-for";

/// Audit metadata for a new session.
///
/// The client IP is the first `X-Forwarded-For` hop, else the socket peer.
pub fn client_meta(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientMeta {
    let forwarded = headers
        .get(FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let ip_address = forwarded.or_else(|| peer.map(|addr| addr.ip().to_string()));
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    ClientMeta::new(ip_address, user_agent)
}
