//! content merging for note logs.
//!
//! both the three-way note map merge and a single append into an existing
//! log go through the same [`NoteMerger`]. The union merger keeps every line
//! either side has ever written: ours first, then theirs, exact duplicates
//! dropped. Picking one side instead would lose a concurrent writer's record.
//! Lines are compared as bytes, so content that is not valid UTF-8 merges
//! like anything else and is left for readers to skip.

use std::collections::HashSet;

use crate::storage::{BlobId, GitRepository, StorageResult};

/// resolves a target whose log changed on both sides
pub trait NoteMerger: Send + Sync {
    /// merge two diverged blobs for one target
    ///
    /// `base` is the common version, if any. Implementations must not drop
    /// content from either side.
    fn merge(
        &self,
        repo: &GitRepository,
        base: Option<BlobId>,
        ours: BlobId,
        theirs: BlobId,
    ) -> StorageResult<BlobId>;
}

/// Concatenate both sides, deduplicating identical lines.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnionMerger;

impl NoteMerger for UnionMerger {
    fn merge(
        &self,
        repo: &GitRepository,
        _base: Option<BlobId>,
        ours: BlobId,
        theirs: BlobId,
    ) -> StorageResult<BlobId> {
        if ours == theirs {
            return Ok(ours);
        }
        let ours_bytes = repo.read_blob(ours)?;
        let theirs_bytes = repo.read_blob(theirs)?;
        if is_blank(&ours_bytes) {
            return Ok(theirs);
        }
        if is_blank(&theirs_bytes) {
            return Ok(ours);
        }

        let merged = union_lines(&ours_bytes, &theirs_bytes);
        if merged == ours_bytes {
            return Ok(ours);
        }
        if merged == theirs_bytes {
            return Ok(theirs);
        }
        repo.write_blob(&merged)
    }
}

fn is_blank(content: &[u8]) -> bool {
    content.iter().all(u8::is_ascii_whitespace)
}

/// every distinct non-empty line of `ours` then `theirs`, each `\n` terminated
///
/// a trailing `\r` belongs to the line, as git's union merge treats it
pub fn union_lines(ours: &[u8], theirs: &[u8]) -> Vec<u8> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(ours.len() + theirs.len());
    for line in ours.split(|b| *b == b'\n').chain(theirs.split(|b| *b == b'\n')) {
        if line.is_empty() || !seen.insert(line) {
            continue;
        }
        out.extend_from_slice(line);
        out.push(b'\n');
    }
    out
}
