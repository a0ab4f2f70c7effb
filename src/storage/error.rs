//! Storage layer error types
//!
//! All errors that can occur while talking to the object store are defined here.
//! We use `thiserror` for ergonomic error definition and better error messages

use std::path::PathBuf;

use thiserror::Error;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// the requested ref was not found
    #[error("ref not found: {0}")]
    RefNotFound(String),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(String),

    /// the revision could not be resolved to an object
    #[error("revision not found: {0}")]
    RevisionNotFound(String),

    /// the configured remote does not exist
    #[error("remote not found: {0}")]
    RemoteNotFound(String),

    /// the ref stayed locked for every attempt
    #[error("failed to lock the ref: {reference} (after {attempts} attempts)")]
    LockFailure { reference: String, attempts: u32 },

    /// ref update failed due to concurrent modification
    #[error("concurrent modification: {reference} was updated by another writer")]
    ConcurrentModification { reference: String },

    /// a ref update returned a result the caller cannot accept
    #[error("unexpected result updating {reference}: {result}")]
    UnexpectedRefUpdate { reference: String, result: String },

    /// the remote refused a pushed ref
    #[error("push of {reference} rejected: {message}")]
    PushRejected { reference: String, message: String },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::RefNotFound(_)
                | StorageError::CommitNotFound(_)
                | StorageError::RevisionNotFound(_)
                | StorageError::RemoteNotFound(_)
        )
    }

    /// check if this error is a conflict with another writer
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StorageError::ConcurrentModification { .. } | StorageError::PushRejected { .. }
        )
    }

    /// check if this error came from contention on a ref lock
    pub fn is_lock_failure(&self) -> bool {
        matches!(self, StorageError::LockFailure { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
