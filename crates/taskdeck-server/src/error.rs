use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use taskdeck_core::TaskError;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Method not allowed")]
    MethodNotAllowed,

    #[error("Change feed not available for this backend")]
    FeedUnavailable,

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::MalformedPayload(rejection.body_text())
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::FeedUnavailable => StatusCode::NOT_IMPLEMENTED,
            ApiError::Task(TaskError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Task(TaskError::Auth(_)) => StatusCode::UNAUTHORIZED,
            ApiError::Task(TaskError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Task(TaskError::Transport(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing text: the bare message, without the variant prefix.
    fn message(&self) -> String {
        match self {
            ApiError::Task(TaskError::Validation(m))
            | ApiError::Task(TaskError::Auth(m))
            | ApiError::Task(TaskError::Transport(m)) => m.clone(),
            ApiError::Task(TaskError::NotFound(id)) => format!("Task {id} not found"),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "request rejected");
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}
