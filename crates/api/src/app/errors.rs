use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use orchard_infra::{ClaimsSyncError, ServiceError};

pub fn service_error_to_response(err: ServiceError, expose_internal: bool) -> axum::response::Response {
    match err {
        ServiceError::Unauthorized => json_error(StatusCode::UNAUTHORIZED, "unauthorized", "unauthorized"),
        ServiceError::Forbidden(msg) => json_error(StatusCode::FORBIDDEN, "forbidden", msg),
        ServiceError::NotFound(what) => json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found")),
        ServiceError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        ServiceError::Validation(msg) => json_error(StatusCode::BAD_REQUEST, "validation_error", msg),
        ServiceError::Internal(msg) => {
            tracing::error!(error = %msg, "internal error");
            let message = if expose_internal { msg } else { "internal error".to_string() };
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
        }
    }
}

pub fn claims_sync_error_to_response(err: ClaimsSyncError, expose_internal: bool) -> axum::response::Response {
    match err {
        ClaimsSyncError::ProfileMissing(id) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("no profile for {id}"))
        }
        ClaimsSyncError::Claims(e) => json_error(StatusCode::SERVICE_UNAVAILABLE, "claims_unavailable", e.to_string()),
        ClaimsSyncError::Store(e) => service_error_to_response(e.into(), expose_internal),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn invalid_id(what: &str) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "invalid_id", format!("invalid {what} id"))
}
