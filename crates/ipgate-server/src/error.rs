use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::service::AllowlistError;

/// Error returned to HTTP callers as `{"error": message}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    /// The message is sent as-is; the cause is only logged.
    #[error("{0}")]
    Internal(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Maps a service failure, logging persistence causes under `failure`.
    pub fn from_allowlist(e: AllowlistError, failure: &'static str) -> Self {
        match e {
            AllowlistError::InvalidInput(msg) | AllowlistError::DuplicateEntry(msg) => {
                Self::BadRequest(msg)
            }
            AllowlistError::NotFound(msg) => Self::NotFound(msg),
            AllowlistError::Persistence(cause) => {
                tracing::error!(error = %cause, "{failure}");
                Self::Internal(failure)
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}
