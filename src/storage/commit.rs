//! Commit creation and graph queries
//!
//! every note write is a commit on a notes ref:
//! - a plain write has the previous notes commit as its only parent
//! - a merge of two diverged note histories has both as parents
//!
//! this module handles commit creation, ancestry queries, and diff operations

use std::path::PathBuf;

use chrono::{DateTime, TimeZone, Utc};
use git2::{Delta, Diff, DiffOptions, Repository, Sort};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::tree::TreeHandle;
use crate::storage::types::{Change, ChangeStatus, CommitId, GitSignature, TreeId};

/// information about a commit
#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub id: CommitId,
    pub tree_id: TreeId,
    pub parent_ids: Vec<CommitId>,
    pub message: String,
    pub author_name: String,
    pub author_email: String,
    pub timestamp: DateTime<Utc>,
}

impl CommitInfo {
    /// create CommitInfo from a git2::Commit
    pub(crate) fn from_git2(commit: &git2::Commit<'_>) -> Self {
        let author = commit.author();
        let time = commit.time();
        let timestamp = Utc
            .timestamp_opt(time.seconds(), 0)
            .single()
            .unwrap_or_else(Utc::now);

        Self {
            id: CommitId::new(commit.id()),
            tree_id: TreeId::new(commit.tree_id()),
            parent_ids: commit.parent_ids().map(CommitId::new).collect(),
            message: commit.message().unwrap_or("").to_string(),
            author_name: author.name().unwrap_or("Unknown").to_string(),
            author_email: author.email().unwrap_or("unknown@unknown").to_string(),
            timestamp,
        }
    }

    /// check if this is a merge commit (has multiple parents)
    pub fn is_merge(&self) -> bool {
        self.parent_ids.len() > 1
    }

    /// get the first (or only) parent
    pub fn first_parent(&self) -> Option<CommitId> {
        self.parent_ids.first().copied()
    }

    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// builder for creating commits with a fluent interface
///
/// the commit is written to the object database only; moving a ref onto it
/// is a separate compare-and-swap step
pub struct CommitBuilder<'a> {
    repo: &'a Repository,
    tree_id: Option<TreeId>,
    parents: Vec<CommitId>,
    message: String,
    signature: GitSignature,
}

impl<'a> CommitBuilder<'a> {
    /// create a new CommitBuilder
    pub fn new(repo: &'a Repository) -> Self {
        Self {
            repo,
            tree_id: None,
            parents: Vec::new(),
            message: String::new(),
            signature: GitSignature::tool(),
        }
    }

    /// set the tree for this commit
    pub fn tree(mut self, tree_id: TreeId) -> Self {
        self.tree_id = Some(tree_id);
        self
    }

    /// add a parent commit
    pub fn parent(mut self, parent: CommitId) -> Self {
        self.parents.push(parent);
        self
    }

    /// set multiple parents (for merge commits)
    pub fn parents(mut self, parents: Vec<CommitId>) -> Self {
        self.parents = parents;
        self
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the author/committer signature
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// create the commit and return its ID
    pub fn commit(self) -> StorageResult<CommitId> {
        let tree_id = self
            .tree_id
            .ok_or_else(|| StorageError::Internal("commit requires a tree".to_string()))?;

        let tree = self.repo.find_tree(tree_id.raw())?;
        let sig = self.signature.to_git2_signature()?;

        // collect parent commits
        let parent_commits: Vec<git2::Commit<'_>> = self
            .parents
            .iter()
            .map(|id| self.repo.find_commit(id.raw()))
            .collect::<Result<_, _>>()?;

        let parent_refs: Vec<&git2::Commit<'_>> = parent_commits.iter().collect();

        let oid = self
            .repo
            .commit(None, &sig, &sig, &self.message, &tree, &parent_refs)?;

        Ok(CommitId::new(oid))
    }
}

/// get information about a commit
pub fn get_commit(repo: &Repository, id: CommitId) -> StorageResult<CommitInfo> {
    let commit = repo
        .find_commit(id.raw())
        .map_err(|_| StorageError::CommitNotFound(id.to_string()))?;

    Ok(CommitInfo::from_git2(&commit))
}

/// get the tree snapshot at a specific commit
pub fn get_tree_at_commit(repo: &Repository, commit_id: CommitId) -> StorageResult<TreeHandle<'_>> {
    let commit = repo
        .find_commit(commit_id.raw())
        .map_err(|_| StorageError::CommitNotFound(commit_id.to_string()))?;

    let tree = commit.tree()?;
    Ok(TreeHandle::new(tree))
}

/// resolve a revision (hash, abbreviated hash, branch, ref) to a commit
///
/// returns None if the revision does not name a commit in this repository
pub fn resolve_commit(repo: &Repository, spec: &str) -> StorageResult<Option<CommitId>> {
    let object = match repo.revparse_single(spec) {
        Ok(object) => object,
        Err(e) if is_unresolved(&e) => return Ok(None),
        Err(e) => return Err(StorageError::Git(e)),
    };
    match object.peel_to_commit() {
        Ok(commit) => Ok(Some(CommitId::new(commit.id()))),
        Err(_) => Ok(None),
    }
}

fn is_unresolved(e: &git2::Error) -> bool {
    matches!(
        e.code(),
        git2::ErrorCode::NotFound | git2::ErrorCode::Ambiguous | git2::ErrorCode::InvalidSpec
    ) || e.class() == git2::ErrorClass::Invalid
}

/// compute the diff between two commits
///
/// returns a list of changed paths
pub fn diff_commits(repo: &Repository, old: CommitId, new: CommitId) -> StorageResult<Vec<Change>> {
    let old_commit = repo.find_commit(old.raw())?;
    let new_commit = repo.find_commit(new.raw())?;

    let old_tree = old_commit.tree()?;
    let new_tree = new_commit.tree()?;

    let mut opts = DiffOptions::new();
    let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;

    let changes = extract_changes_from_diff(&diff)?;
    Ok(changes)
}

/// compute changes from a diff
fn extract_changes_from_diff(diff: &Diff<'_>) -> StorageResult<Vec<Change>> {
    let mut changes = Vec::new();

    for delta in diff.deltas() {
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(PathBuf::from)
            .unwrap_or_default();

        let status = match delta.status() {
            Delta::Added => ChangeStatus::Added,
            Delta::Deleted => ChangeStatus::Deleted,
            Delta::Modified => ChangeStatus::Modified,
            Delta::Renamed => ChangeStatus::Renamed,
            Delta::Copied => ChangeStatus::Copied,
            _ => ChangeStatus::Other,
        };

        changes.push(Change { path, status });
    }

    Ok(changes)
}

/// find the merge base (common ancestor) of two commits
///
/// returns None if there is no common ancestor
pub fn find_merge_base(repo: &Repository, a: CommitId, b: CommitId) -> StorageResult<Option<CommitId>> {
    match repo.merge_base(a.raw(), b.raw()) {
        Ok(oid) => Ok(Some(CommitId::new(oid))),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(StorageError::Git(e)),
    }
}

/// check whether `ancestor` is reachable from `descendant`
///
/// a commit counts as its own ancestor
pub fn is_ancestor(repo: &Repository, ancestor: CommitId, descendant: CommitId) -> StorageResult<bool> {
    if ancestor == descendant {
        return Ok(true);
    }
    Ok(repo.graph_descendant_of(descendant.raw(), ancestor.raw())?)
}

/// the first commit reachable from `tip` but not from `hide`, oldest first
///
/// for a review branch this is the commit the review was requested at
pub fn first_commit_after(repo: &Repository, tip: CommitId, hide: CommitId) -> StorageResult<Option<CommitId>> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(tip.raw())?;
    revwalk.hide(hide.raw())?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

    match revwalk.next() {
        Some(oid) => Ok(Some(CommitId::new(oid?))),
        None => Ok(None),
    }
}

/// message formatting for note commits
pub struct CommitMessage;

impl CommitMessage {
    /// format a message for appending a review record
    pub fn write_review(target: &str) -> String {
        format!("Writing review for {}", target)
    }

    /// format a message for appending a comment record
    pub fn write_comment(target: &str) -> String {
        format!("Writing comment for {}", target)
    }

    /// format a message for a writer that lost the race and merged
    pub fn merge_records() -> String {
        "Merged note records\n".to_string()
    }

    /// format a message for a sync that merged local and origin notes
    pub fn merge_sync() -> String {
        "Merged note commits\n".to_string()
    }
}
