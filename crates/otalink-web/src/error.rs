//! Error responses for the HTTP API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::{error, warn};

use otalink_core::{CommandError, ConfigError};
use otalink_protocol::CodecError;
use otalink_server::ImageError;

/// Errors returned by route handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Image(#[from] ImageError),

    /// A blocking source read panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Codec(CodecError::MalformedCommand(_)) => StatusCode::BAD_REQUEST,
            ApiError::Codec(CodecError::SerializeError(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Command(_) => StatusCode::CONFLICT,
            ApiError::Image(ImageError::Rejected(_)) => StatusCode::CONFLICT,
            ApiError::Image(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Image(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = serde_json::json!({
            "status": "error",
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
