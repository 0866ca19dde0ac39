use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::models::RequestStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("request '{0}' already exists")]
    Duplicate(String),

    #[error("request '{0}' not found")]
    NotFound(String),

    #[error("request '{id}' already settled as {status}")]
    AlreadySettled { id: String, status: RequestStatus },

    #[error("notification failed for request '{request_id}': {source}")]
    Notification {
        request_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("backend delivery failed for request '{request_id}': {source}")]
    Backend {
        request_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Lift a store error, keeping sqlx errors distinguishable from everything else.
    pub fn from_store(err: anyhow::Error) -> Self {
        match err.downcast::<sqlx::Error>() {
            Ok(db) => AppError::Database(db),
            Err(other) => AppError::Internal(other),
        }
    }

    /// Label used for the side-effect failure counter.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::Duplicate(_) => "duplicate",
            AppError::NotFound(_) => "not_found",
            AppError::AlreadySettled { .. } => "already_settled",
            AppError::Notification { .. } => "notification",
            AppError::Backend { .. } => "backend",
            AppError::Database(_) => "database",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
            ),
            AppError::Duplicate(id) => (
                StatusCode::CONFLICT,
                "conflict_error",
                "duplicate_request",
                format!("request '{}' already exists", id),
            ),
            AppError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                "not_found_error",
                "request_not_found",
                format!("request '{}' not found", id),
            ),
            AppError::AlreadySettled { id, status } => (
                StatusCode::CONFLICT,
                "conflict_error",
                "already_settled",
                format!("request '{}' is already {}", id, status),
            ),
            AppError::Notification { request_id, source } => {
                tracing::warn!(request_id = %request_id, error = %source, "notification failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "notification_failed",
                    format!(
                        "request '{}' was saved as pending but the reviewer notification failed",
                        request_id
                    ),
                )
            }
            AppError::Backend { request_id, source } => {
                tracing::warn!(request_id = %request_id, error = %source, "backend delivery failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "upstream_error",
                    "backend_failed",
                    format!("backend delivery failed for request '{}'", request_id),
                )
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        (status, body).into_response()
    }
}
