use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::agents::TaskManagerError;

/// API error type with HTTP status code and message
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    /// Creates a new API error
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Creates a 400 Bad Request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// Creates a 404 Not Found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    /// Creates a 500 Internal Server Error
    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl From<TaskManagerError> for ApiError {
    fn from(err: TaskManagerError) -> Self {
        match err {
            TaskManagerError::UnknownAgent(_) => Self::bad_request(err.to_string()),
            TaskManagerError::NotFound(_) => Self::not_found(err.to_string()),
            TaskManagerError::NotOwned(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            TaskManagerError::DispatcherStopped => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            }
            TaskManagerError::Store(_) => {
                tracing::error!(error = %err, "task store failure");
                Self::internal_server_error(err.to_string())
            }
        }
    }
}
