//! Error types for storage clients and models.

use crate::client::SessionHandle;
use docket_state::{DocumentError, PathError};
use thiserror::Error;

/// Errors returned by a [`StoreClient`](crate::StoreClient).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// No record with this id.
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Insert of an id that is already taken.
    #[error("record already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// The session was never started, or already finished.
    #[error("unknown session: {0}")]
    UnknownSession(SessionHandle),

    /// A collaborator call exceeded the configured bound.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The record cannot be stored as given.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// A changeset does not fit the stored record.
    #[error("cannot apply changeset: {0}")]
    Change(#[from] PathError),

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}

impl StoreError {
    #[inline]
    pub fn not_found(collection: &str, id: impl ToString) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    #[inline]
    pub fn already_exists(collection: &str, id: impl ToString) -> Self {
        StoreError::AlreadyExists {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    #[inline]
    pub fn timeout(operation: &'static str, timeout_ms: u64) -> Self {
        StoreError::Timeout {
            operation,
            timeout_ms,
        }
    }
}

/// Result type for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by [`Model`](crate::Model) operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// The document refused the operation (validation, hooks, casting).
    #[error(transparent)]
    Document(#[from] DocumentError),

    /// The storage client failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A persisted document has no `_id` to address its record.
    #[error("document in `{collection}` has no _id")]
    MissingId { collection: String },
}

impl ModelError {
    /// The document error, if the document refused.
    pub fn as_document(&self) -> Option<&DocumentError> {
        match self {
            ModelError::Document(e) => Some(e),
            _ => None,
        }
    }

    /// The store error, if the storage client failed.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            ModelError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;
