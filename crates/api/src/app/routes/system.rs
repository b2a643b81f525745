use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use serde_json::json;

use gatehouse_auth::AuthenticatedSubject;

use crate::app::dto::SessionView;
use crate::app::{errors, services::AppServices};

pub async fn health(Extension(services): Extension<Arc<AppServices>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "session_backend": services.lifecycle.session_backend(),
    }))
}

pub async fn whoami(Extension(subject): Extension<AuthenticatedSubject>) -> impl IntoResponse {
    Json(subject)
}

/// GET /api/sessions: the caller's live sessions, fingerprints only.
pub async fn sessions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(subject): Extension<AuthenticatedSubject>,
) -> axum::response::Response {
    match services.lifecycle.list_sessions(subject.id).await {
        Ok(sessions) => {
            let sessions: Vec<SessionView> = sessions.iter().map(SessionView::from).collect();
            (StatusCode::OK, Json(json!({ "sessions": sessions }))).into_response()
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}
