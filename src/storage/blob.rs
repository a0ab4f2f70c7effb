//! Blob operations for note content.
//!
//! Note content is meant to be UTF-8 text, one JSON record per line, but any
//! writer can put arbitrary bytes in a blob. Reads never fail on content:
//! merging works on raw bytes and text reads are lossy. The line format lives
//! in the record codec.

use crate::storage::error::StorageResult;
use crate::storage::types::BlobId;

/// write raw bytes as a blob to the repository
///
/// returns the blob ID (SHA-1 hash of the content)
pub fn write_blob(repo: &git2::Repository, bytes: &[u8]) -> StorageResult<BlobId> {
    let oid = repo.blob(bytes)?;
    Ok(BlobId::new(oid))
}

/// read a blob's raw content
pub fn read_blob(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(blob.content().to_vec())
}

/// read a blob's content as text, replacing invalid UTF-8 with U+FFFD
pub fn read_blob_text(repo: &git2::Repository, blob_id: BlobId) -> StorageResult<String> {
    let blob = repo.find_blob(blob_id.raw())?;
    Ok(String::from_utf8_lossy(blob.content()).into_owned())
}
