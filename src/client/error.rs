//! client error types

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("record encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    /// no readable review is attached to the target
    #[error("no review found for {0}")]
    ReviewNotFound(String),

    /// the target is neither a revision nor a commit hash
    #[error("invalid review target: {0}")]
    InvalidTarget(String),

    /// the request was refused before anything was written
    #[error("{0}")]
    Precondition(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::ReviewNotFound(_) => true,
            ClientError::Storage(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// another writer got in the way; retrying later may succeed
    pub fn is_conflict(&self) -> bool {
        match self {
            ClientError::Storage(e) => e.is_conflict() || e.is_lock_failure(),
            _ => false,
        }
    }

    pub fn is_precondition(&self) -> bool {
        matches!(self, ClientError::Precondition(_) | ClientError::InvalidTarget(_))
    }
}
