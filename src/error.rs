//! Error types for the ingestion and retrieval dataplane

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for dataplane operations
pub type Result<T> = std::result::Result<T, Error>;

/// Dataplane errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Request validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed identifier in a path parameter
    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    /// Unsupported file format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// File exceeds the resolved profile's size limit
    #[error("File too large: {size} bytes (limit {limit})")]
    FileTooLarge { size: u64, limit: u64 },

    /// Content hash already present in the store
    #[error("Duplicate file (existing document {existing_id})")]
    DuplicateFile { existing_id: Uuid },

    /// Document not found
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// Profile not found
    #[error("Profile not found: {0}")]
    ProfileNotFound(String),

    /// Sync binding not found
    #[error("Sync binding not found: {0}")]
    BindingNotFound(String),

    /// Optimistic-lock failure or an invalid state transition
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Embedding provider error
    #[error("Embedding generation failed: {0}")]
    Embedding(String),

    /// Vector index error
    #[error("Vector index error: {0}")]
    VectorIndex(String),

    /// Metadata store error
    #[error("Database error: {0}")]
    Database(String),

    /// Heavy-lane converter error
    #[error("Converter error: {0}")]
    Converter(String),

    /// Remote source (folder listing/download) error
    #[error("Remote source error: {0}")]
    RemoteSource(String),

    /// Sync already running for the binding
    #[error("Sync already in progress for binding {0}")]
    SyncInProgress(Uuid),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create an embedding error
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Short machine-readable code surfaced in HTTP error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidId(_) => "INVALID_ID",
            Self::UnsupportedFormat(_) => "INVALID_FORMAT",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::DuplicateFile { .. } => "DUPLICATE_FILE",
            Self::DocumentNotFound(_) => "NOT_FOUND",
            Self::ProfileNotFound(_) => "NOT_FOUND",
            Self::BindingNotFound(_) => "NOT_FOUND",
            Self::StateConflict(_) => "STATE_CONFLICT",
            Self::Embedding(_) => "EMBEDDING_ERROR",
            Self::VectorIndex(_) => "VECTOR_INDEX_ERROR",
            Self::Database(_) => "STORAGE_ERROR",
            Self::Converter(_) => "CONVERTER_ERROR",
            Self::RemoteSource(_) => "REMOTE_SOURCE_ERROR",
            Self::SyncInProgress(_) => "SYNC_IN_PROGRESS",
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Http(_) => "HTTP_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::InvalidId(_) | Self::UnsupportedFormat(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::FileTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::DuplicateFile { .. } | Self::StateConflict(_) | Self::SyncInProgress(_) => {
                StatusCode::CONFLICT
            }
            Self::DocumentNotFound(_) | Self::ProfileNotFound(_) | Self::BindingNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(code = self.code(), "request failed: {}", self);
        }

        let mut body = json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        });

        // Duplicate uploads point the caller at the existing document.
        if let Self::DuplicateFile { existing_id } = &self {
            body["error"]["existingId"] = json!(existing_id.to_string());
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_maps_to_conflict() {
        let err = Error::DuplicateFile {
            existing_id: Uuid::nil(),
        };
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "DUPLICATE_FILE");
    }

    #[test]
    fn validation_maps_to_bad_request() {
        assert_eq!(
            Error::Validation("topK out of range".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
