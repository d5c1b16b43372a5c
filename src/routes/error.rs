//! Caller-facing failures, rendered as `{ "error": ... }` with a 4xx/5xx status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::logic::LogicError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!(target: "trivia_backend", error = %msg, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<LogicError> for ApiError {
    fn from(err: LogicError) -> Self {
        match err {
            LogicError::UnknownQuestion(_) => ApiError::NotFound(err.to_string()),
            LogicError::InvalidOption(_) | LogicError::InvalidDifficulty(_) => ApiError::BadRequest(err.to_string()),
            LogicError::Store(e) => ApiError::Internal(e.to_string()),
            LogicError::Background(e) => ApiError::Internal(e.to_string()),
        }
    }
}
