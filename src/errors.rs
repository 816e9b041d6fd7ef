use thiserror::Error;
use uuid::Uuid;

use crate::storage::Collection;

/// Error type that captures failures reported by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} record {id} not found")]
    NotFound { collection: Collection, id: Uuid },
    #[error("{collection} record {id} already exists")]
    AlreadyExists { collection: Collection, id: Uuid },
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StoreError {
    /// Short hint shown to callers when a write fails at the store boundary.
    pub fn hint(&self) -> &'static str {
        match self {
            StoreError::NotFound { .. } => "the record was removed by another action; reload and retry",
            StoreError::AlreadyExists { .. } => "a record with the same id is already stored",
            StoreError::PermissionDenied(_) => "check that the active workspace allows this change",
            StoreError::Unavailable(_) => "the store is unreachable; retry once it is back online",
            StoreError::PreconditionFailed(_) => "the record changed concurrently; reload and retry",
            StoreError::Io(_) | StoreError::Serde(_) => "the local store file could not be written",
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
