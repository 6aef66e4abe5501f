use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::snapshot::SnapshotError;

// Type alias for Result with our AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failures surfaced by the admin operations.
///
/// Upstream and canonicalization failures reach the admin caller wrapped in
/// [`AppError::Snapshot`]; the proxy path never uses this type and maps
/// upstream failures to 502/504 directly.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Service '{0}' not found")]
    ServiceNotFound(String),

    #[error("No snapshots found for service '{0}'")]
    SnapshotNotFound(String),

    #[error("Service '{0}' already exists")]
    DuplicateName(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to snapshot upstream server: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::ServiceNotFound(_) | AppError::SnapshotNotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            AppError::DuplicateName(_) | AppError::Validation(_) | AppError::Snapshot(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}
