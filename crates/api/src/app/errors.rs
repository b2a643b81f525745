use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::IntoResponse;
use serde_json::json;
use tracing::{debug, error};

use gatehouse_auth::{AuthError, ErrorClass};

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// Uniform 401; the body never says which check failed.
pub fn unauthenticated() -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "authentication required")
}

pub fn forbidden(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::FORBIDDEN, "forbidden", message)
}

pub fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorClass::Forbidden => StatusCode::FORBIDDEN,
        ErrorClass::Conflict => StatusCode::CONFLICT,
        ErrorClass::BadRequest => StatusCode::BAD_REQUEST,
        ErrorClass::NotFound => StatusCode::NOT_FOUND,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    match err.class() {
        ErrorClass::Unauthenticated => {
            debug!(reason = err.code(), "request unauthenticated");
            unauthenticated()
        }
        ErrorClass::Internal => {
            error!(error = %err, "request failed");
            let mut res = json_error(StatusCode::INTERNAL_SERVER_ERROR, err.code(), "internal error");
            if err.is_retryable() {
                res.headers_mut().insert(RETRY_AFTER, HeaderValue::from_static("1"));
            }
            res
        }
        class => json_error(status_for(class), err.code(), err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_are_indistinguishable() {
        for err in [AuthError::ExpiredToken, AuthError::InvalidToken, AuthError::RevokedSession] {
            let res = auth_error_to_response(err);
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
    }

    #[test]
    fn store_faults_are_internal_and_retryable() {
        let res = auth_error_to_response(AuthError::store("timed out"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.headers().get(RETRY_AFTER).unwrap(), "1");

        let res = auth_error_to_response(AuthError::Signing("bad key".into()));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn classes_map_to_statuses() {
        assert_eq!(auth_error_to_response(AuthError::AccountDisabled).status(), StatusCode::FORBIDDEN);
        assert_eq!(auth_error_to_response(AuthError::DuplicateAssignment).status(), StatusCode::CONFLICT);
        assert_eq!(auth_error_to_response(AuthError::RoleInUse { holders: 2 }).status(), StatusCode::CONFLICT);
        assert_eq!(
            auth_error_to_response(AuthError::InvalidPermissionSpec("x".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(auth_error_to_response(AuthError::NotFound("role")).status(), StatusCode::NOT_FOUND);
    }
}
