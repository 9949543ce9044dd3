//! Uniform error-to-response mapping
//!
//! Every handler returns the core error type; this module maps each kind to
//! its status code. Internal failures surface a generic message only; the
//! detail stays in the server logs.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hearthlink_core::Error;
use serde_json::json;
use tracing::error;

/// Wrapper giving the core error an HTTP representation
#[derive(Debug)]
pub struct ApiError(pub Error);

/// Handler result alias
pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            Error::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "validation", "field": field, "message": message }),
            ),
            Error::NotFound(entity) => (
                StatusCode::NOT_FOUND,
                json!({ "error": "not_found", "message": format!("{} not found", entity) }),
            ),
            Error::Authentication => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": "authentication", "message": "authentication failed" }),
            ),
            Error::Conflict(message) => (
                StatusCode::CONFLICT,
                json!({ "error": "conflict", "message": message }),
            ),
            Error::Internal(_) | Error::Io(_) | Error::Json(_) => {
                error!("Internal error: {}", self.0);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "internal", "message": "internal server error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
