use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::facade::FacadeError;

/// JSON error body returned by every failing request.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ErrorBody {
    pub message: String,
    pub code: String,
    pub request_id: String,
    /// Per-field validation messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl ErrorBody {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: code.into(),
            request_id: "unknown".to_string(),
            errors: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: Box<ErrorBody>,
}

impl ApiError {
    fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Box::new(ErrorBody::new(code, message)),
        }
    }

    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, code, message)
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.body.request_id = request_id.into();
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.body.errors = Some(errors);
        self
    }

    /// Maps a facade outcome to a response. Storage and unexpected failures
    /// are logged here and reported with a generic message.
    pub fn from_facade(err: FacadeError, entity: &str, request_id: &str) -> Self {
        let api_error = match err {
            FacadeError::InvalidInput(errors) => {
                ApiError::bad_request("invalid_input", "Validation failed").with_errors(errors)
            }
            FacadeError::Conflict(message) => ApiError::conflict("conflict", message),
            FacadeError::NotFound { label } => {
                ApiError::not_found("not_found", format!("{label} not found"))
            }
            err @ (FacadeError::StorageUnavailable(_) | FacadeError::Unexpected(_)) => {
                tracing::error!(error = %err, entity = %entity, request_id = %request_id, "Request failed");
                ApiError::internal("internal_error", "Internal server error")
            }
        };
        api_error.with_request_id(request_id)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
