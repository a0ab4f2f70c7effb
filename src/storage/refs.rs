//! Reference management.
//!
//! Git refs are pointers to commits. The notes refs are the only mutable
//! state this crate writes, and they only ever move through
//! [`RefManager::compare_and_swap`]: the update is applied only if the ref
//! still holds the value the caller last saw.

use git2::{ErrorCode, Repository};
use tracing::debug;

use crate::storage::commit;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, RefName, RefUpdate};

/// Manages Git references.
pub struct RefManager;

impl RefManager {
    /// Resolve a ref to its current commit ID, or None if it does not exist.
    pub fn read_ref(repo: &Repository, name: &RefName) -> StorageResult<Option<CommitId>> {
        let reference = match repo.find_reference(name.as_str()) {
            Ok(reference) => reference,
            Err(e) if e.code() == ErrorCode::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Git(e)),
        };

        let commit = reference
            .peel_to_commit()
            .map_err(|_| StorageError::RefNotFound(name.to_string()))?;

        Ok(Some(CommitId::new(commit.id())))
    }

    /// Check if a ref exists.
    pub fn ref_exists(repo: &Repository, name: &RefName) -> bool {
        repo.find_reference(name.as_str()).is_ok()
    }

    /// Atomically move `name` from `expected` to `new_target`.
    ///
    /// `expected == None` means the ref must not exist yet. Contention is
    /// reported through the returned [`RefUpdate`], not as an error:
    /// `LockFailure` when another process holds the ref lock, `Rejected`
    /// when the ref no longer holds `expected`. Only I/O-level problems
    /// surface as `Err`.
    pub fn compare_and_swap(
        repo: &Repository,
        name: &RefName,
        expected: Option<CommitId>,
        new_target: CommitId,
        log_message: &str,
    ) -> StorageResult<RefUpdate> {
        let written = match expected {
            None => repo.reference(name.as_str(), new_target.raw(), false, log_message),
            Some(old) => repo.reference_matching(
                name.as_str(),
                new_target.raw(),
                true,
                old.raw(),
                log_message,
            ),
        };

        if let Err(e) = written {
            let result = match e.code() {
                ErrorCode::Locked => RefUpdate::LockFailure,
                // Exists: creating a ref someone else created first.
                // Modified: the ref holds something other than `expected`.
                // NotFound: the ref we expected to move was deleted.
                ErrorCode::Exists | ErrorCode::Modified | ErrorCode::NotFound => RefUpdate::Rejected,
                _ => return Err(StorageError::Git(e)),
            };
            debug!(reference = %name, result = %result, "ref update refused");
            return Ok(result);
        }

        let result = match expected {
            None => RefUpdate::New,
            Some(old) if old == new_target => RefUpdate::NoChange,
            Some(old) if commit::is_ancestor(repo, old, new_target)? => RefUpdate::FastForward,
            Some(_) => RefUpdate::Forced,
        };
        debug!(reference = %name, target = %new_target.short(), result = %result, "ref updated");
        Ok(result)
    }

    /// List all refs matching a glob (e.g. `refs/notes/devtools/*`).
    pub fn list_refs(repo: &Repository, glob: &str) -> StorageResult<Vec<RefName>> {
        let mut result = Vec::new();
        for reference in repo.references_glob(glob)? {
            let reference = reference?;
            if let Some(name) = reference.name() {
                if let Ok(ref_name) = RefName::new(name) {
                    result.push(ref_name);
                }
            }
        }
        result.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(result)
    }
}
