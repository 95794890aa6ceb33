//! Storage engine error taxonomy
//!
//! Every fallible operation in the engine returns a `StoreError`. Handlers
//! rely on the `ResponseError` impl to turn a variant into the right HTTP
//! status; authentication failures always collapse to one opaque 401 body
//! so callers cannot probe which sub-check rejected them.

use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use std::io;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("repository {id} not found")]
    RepositoryNotFound { id: Uuid },

    #[error("object {key} not found")]
    ObjectNotFound { key: String },

    #[error("repository {id} already exists")]
    DuplicateRepository { id: Uuid },

    /// Conditional update/delete failed: the supplied If-Match ETag did not
    /// match the object's current ETag.
    #[error("conditional request failed for object {key}: expected {expected}, found {found:?}")]
    ObjectConflict {
        key: String,
        expected: String,
        found: Option<String>,
    },

    /// Non-blocking lock acquisition failed because the entity is busy.
    #[error("entity is locked by another operation")]
    LockConflict,

    #[error("operation forbidden")]
    Forbidden,

    #[error("Content-Length header is required")]
    LengthRequired,

    #[error("payload exceeds the configured maximum of {max} bytes")]
    TooLarge { max: u64 },

    #[error("failed to create repository {id}: {source}")]
    RepositoryCreation { id: Uuid, source: io::Error },

    #[error("failed to delete repository {id}: {source}")]
    RepositoryDeletion { id: Uuid, source: io::Error },

    #[error("failed to delete object {key}: {source}")]
    ObjectDeletion { key: String, source: io::Error },

    /// An indexed object's backing file could not be read or its parent
    /// directories could not be created. Indexed-but-unreadable is a
    /// consistency fault, never a normal not-found.
    #[error("failed to load object {key}: {source}")]
    ObjectLoad { key: String, source: io::Error },

    #[error("failed to store object {key}: {source}")]
    ObjectFlush { key: String, source: io::Error },

    #[error("failed to load repository {id}: {reason}")]
    RepositoryLoad { id: Uuid, reason: String },

    #[error("failed to flush repository metadata for {id}: {reason}")]
    RepositoryFlush { id: Uuid, reason: String },

    /// Opaque authentication failure. The concrete sub-reason (missing
    /// header, unknown key, bad signature, missing Date) is logged where it
    /// is detected and never exposed on the wire.
    #[error("authentication failed")]
    Unauthorized,
}

impl ResponseError for StoreError {
    fn status_code(&self) -> StatusCode {
        match self {
            StoreError::RepositoryNotFound { .. } | StoreError::ObjectNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            StoreError::DuplicateRepository { .. }
            | StoreError::ObjectConflict { .. }
            | StoreError::LockConflict => StatusCode::CONFLICT,
            StoreError::Forbidden => StatusCode::FORBIDDEN,
            StoreError::LengthRequired => StatusCode::LENGTH_REQUIRED,
            StoreError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StoreError::Unauthorized => StatusCode::UNAUTHORIZED,
            StoreError::RepositoryCreation { .. }
            | StoreError::RepositoryDeletion { .. }
            | StoreError::ObjectDeletion { .. }
            | StoreError::ObjectLoad { .. }
            | StoreError::ObjectFlush { .. }
            | StoreError::RepositoryLoad { .. }
            | StoreError::RepositoryFlush { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self {
            StoreError::Unauthorized => HttpResponse::Unauthorized()
                .insert_header(("WWW-Authenticate", "Havalo"))
                .body("authentication failed"),
            other => HttpResponse::build(other.status_code())
                .json(serde_json::json!({ "error": other.to_string() })),
        }
    }
}
