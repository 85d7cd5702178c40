use crate::services::{copy::CopyError, storage_service::StorageError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;
use tracing::error;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

fn storage_status(err: &StorageError) -> StatusCode {
    match err {
        StorageError::BucketNotFound(_)
        | StorageError::ObjectNotFound { .. }
        | StorageError::VersionNotFound { .. }
        | StorageError::UploadNotFound(_) => StatusCode::NOT_FOUND,
        StorageError::BucketAlreadyExists(_) => StatusCode::CONFLICT,
        StorageError::InvalidBucketName { .. }
        | StorageError::UnsupportedRegion(_)
        | StorageError::InvalidObjectKey
        | StorageError::InvalidPart(_)
        | StorageError::InvalidPartOrder => StatusCode::BAD_REQUEST,
        StorageError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
        StorageError::Unsupported(_) => StatusCode::NOT_IMPLEMENTED,
        StorageError::Sqlx(_) | StorageError::Io(_) | StorageError::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let status = storage_status(&err);
        if status.is_server_error() {
            error!("storage failure: {}", err);
        }
        AppError::new(status, err.to_string())
    }
}

impl From<CopyError> for AppError {
    fn from(err: CopyError) -> Self {
        let status = match &err {
            CopyError::SourceTooSmall { .. }
            | CopyError::InvalidCopySource(_)
            | CopyError::InvalidOptions(_) => StatusCode::BAD_REQUEST,
            CopyError::IncompleteCopy { .. } | CopyError::Worker(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            other => other
                .storage_error()
                .map(storage_status)
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        };
        if status.is_server_error() {
            error!("copy failure: {}", err);
        }
        AppError::new(status, err.to_string())
    }
}
