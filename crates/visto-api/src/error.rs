// HTTP error mapping
//
// Every gateway error maps to one status code and a stable machine-readable
// code in the body. Validation failures carry the violation list in `details`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use visto_contracts::ErrorBody;
use visto_core::VistoError;

pub struct ApiError(VistoError);

impl From<VistoError> for ApiError {
    fn from(err: VistoError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, details) = match &self.0 {
            VistoError::Validation(violations) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "validation_failed",
                Some(json!(violations)),
            ),
            VistoError::InvalidInput(_) => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_input", None)
            }
            VistoError::Conflict(_) => (StatusCode::CONFLICT, "conflict", None),
            VistoError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
            VistoError::State(_) => (StatusCode::CONFLICT, "state_error", None),
            VistoError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "authorization_error", None)
            }
            VistoError::ActionExecution(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "action_execution_failed",
                None,
            ),
            VistoError::Engine(_) => (StatusCode::INTERNAL_SERVER_ERROR, "engine_error", None),
            VistoError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error", None),
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: code.to_string(),
            message: self.0.to_string(),
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError(VistoError::invalid(msg))
    }
}
