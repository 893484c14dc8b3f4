//! Error types for the shim registry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Result type alias for shim operations.
pub type Result<T> = std::result::Result<T, ShimError>;

/// Errors that can occur while serving a push.
#[derive(Debug, Error)]
pub enum ShimError {
    /// Startup failure (bind, output directory).
    #[error("startup failed: {0}")]
    Startup(String),

    /// Malformed push-protocol request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// No persisted layer under this identifier.
    #[error("no such image: {0}")]
    UnknownImage(String),

    /// The request references an identifier other than the exported one.
    #[error("unexpected layer id: expected {expected}, got {got}")]
    IdentifierMismatch {
        /// Identifier the export session was bound to.
        expected: String,
        /// Identifier the client sent.
        got: String,
    },

    /// Replayed artifact differs from the persisted copy.
    #[error("artifact conflict for {0}: content differs from persisted copy")]
    Conflict(String),

    /// Disk write failure while persisting an artifact.
    #[error("persistence failure: {0}")]
    Persistence(#[from] std::io::Error),
}

impl ShimError {
    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Startup(_) | Self::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidRequest(_) | Self::IdentifierMismatch { .. } => StatusCode::BAD_REQUEST,
            Self::UnknownImage(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ShimError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string()
        });

        (status, axum::Json(body)).into_response()
    }
}
