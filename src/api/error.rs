//! API error types and conversions

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::monitors::ProcessError;
use crate::notify::NotifyError;

/// API result type
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    /// Malformed body or invalid parameters
    BadRequest(String),

    /// Missing or wrong API key
    Forbidden,

    /// Resource not found
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "Invalid API key".to_string()),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<NotifyError> for ApiError {
    fn from(err: NotifyError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ProcessError> for ApiError {
    fn from(err: ProcessError) -> Self {
        match err {
            ProcessError::NotFound(_) => ApiError::NotFound(err.to_string()),
            ProcessError::UnknownChannel(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("invalid request body: {err}"))
    }
}
