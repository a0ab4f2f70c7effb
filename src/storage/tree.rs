//! tree operations for note maps.
//!
//! a git-notes tree maps the hex id of an annotated object to a blob.
//! small note trees are flat (40-hex entry names); large ones written by git
//! itself fan out into `ab/cdef...` subdirectories. Both are read here, only
//! flat trees are written.

use git2::{FileMode, ObjectType, Repository, Tree, TreeBuilder as Git2TreeBuilder};

use crate::storage::error::StorageResult;
use crate::storage::types::{BlobId, TreeId};

/// length of a full hex object id
const HEX_LEN: usize = 40;

/// A read only handle to a git tree at a specific commit
///
/// think of it as a snapshot - it won't change even if new commits are made.
#[derive(Debug)]
pub struct TreeHandle<'repo> {
    tree: Tree<'repo>,
}

impl<'repo> TreeHandle<'repo> {
    /// create a TreeHandle from a git2::Tree
    pub(crate) fn new(tree: Tree<'repo>) -> Self {
        Self { tree }
    }

    /// list every note entry as (hex object id, blob)
    ///
    /// fan-out directories are descended; entries whose accumulated name is
    /// not hex, or not the right length, are skipped
    pub fn note_entries(&self, repo: &'repo Repository) -> StorageResult<Vec<(String, BlobId)>> {
        let mut out = Vec::new();
        collect_note_entries(repo, &self.tree, String::new(), &mut out)?;
        Ok(out)
    }
}

fn collect_note_entries(
    repo: &Repository,
    tree: &Tree<'_>,
    prefix: String,
    out: &mut Vec<(String, BlobId)>,
) -> StorageResult<()> {
    for entry in tree.iter() {
        let name = match entry.name() {
            Some(n) if is_hex(n) => n,
            _ => continue,
        };
        let full = format!("{}{}", prefix, name);

        match entry.kind() {
            Some(ObjectType::Blob) if full.len() == HEX_LEN => {
                out.push((full.to_ascii_lowercase(), BlobId::new(entry.id())));
            }
            Some(ObjectType::Tree) if full.len() < HEX_LEN => {
                let subtree = repo.find_tree(entry.id())?;
                collect_note_entries(repo, &subtree, full, out)?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_hex(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_hexdigit())
}

/// a mutable tree builder for making changes
///
/// this adds up changes and produces a new tree when its final
/// the original tree is not modified
pub struct TreeMutator<'repo> {
    root_builder: Git2TreeBuilder<'repo>,
}

impl<'repo> TreeMutator<'repo> {
    /// create a new TreeMutator for an empty tree
    pub fn empty(repo: &'repo Repository) -> StorageResult<Self> {
        let root_builder = repo.treebuilder(None)?;
        Ok(Self { root_builder })
    }

    /// insert or replace a blob entry
    pub fn upsert_blob(&mut self, name: &str, blob_id: BlobId) -> StorageResult<()> {
        self.root_builder
            .insert(name, blob_id.raw(), FileMode::Blob.into())?;
        Ok(())
    }

    /// write all changes and return the new root tree ID
    pub fn write(self) -> StorageResult<TreeId> {
        let root_id = self.root_builder.write()?;
        Ok(TreeId::new(root_id))
    }
}
