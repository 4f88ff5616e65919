//! Error taxonomy shared by the HTTP and WebSocket paths.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing/invalid field, bad enum value, oversized media. Never retried.
    #[error("{0}")]
    Validation(String),

    /// Block relationship, non-admin action, non-participant. No partial mutation.
    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),

    /// Media upload failed; no message or status row was written.
    #[error("Error uploading media: {0}")]
    Upload(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Permission(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Upload(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Internal(_)) {
            tracing::error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "msg": self.to_string() }));
        (self.status_code(), body).into_response()
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Internal(format!("db: {}", e))
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(format!("task join: {}", e))
    }
}

/// Lock a `DbPool`, mapping a poisoned mutex to an internal error.
#[macro_export]
macro_rules! lock_db {
    ($db:expr) => {
        $db.lock()
            .map_err(|_| $crate::error::ApiError::Internal("DB lock".to_string()))?
    };
}
