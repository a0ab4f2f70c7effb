//!   Core Git repository wrapper.
//!
//!  This is the object store adapter the notes layer is written against. It
//!  wraps `git2::Repository` behind a lock and exposes refs with
//!  compare-and-swap, blobs, commits, ancestry queries, diffs, and remote
//!  transfer. Nothing above this module touches git2 directly.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use git2::Repository;
use parking_lot::Mutex;

use crate::storage::blob;
use crate::storage::commit::{self, CommitBuilder, CommitInfo};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;
use crate::storage::remote;
use crate::storage::types::{BlobId, Change, CommitId, GitSignature, RefName, RefUpdate, TreeId};

/// The main Git repository wrapper.
///
/// Clone this to share the handle - it uses Arc internally. Every
/// operation takes the lock for its own duration only.
#[derive(Clone)]
pub struct GitRepository {
    repo: Arc<Mutex<Repository>>,
    path: PathBuf,
    signature: GitSignature,
}

impl GitRepository {
    fn from_git2(repo: Repository, path: &Path) -> Self {
        let signature = GitSignature::from_repo_config(&repo).unwrap_or_default();
        Self {
            repo: Arc::new(Mutex::new(repo)),
            path: path.to_path_buf(),
            signature,
        }
    }

    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        Ok(Self::from_git2(repo, path))
    }

    /// Open the repository containing `path`, searching parent directories.
    pub fn discover(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo =
            Repository::discover(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        let root = repo.workdir().unwrap_or_else(|| repo.path()).to_path_buf();
        Ok(Self::from_git2(repo, &root))
    }

    /// Initialize a new (non-bare) repository.
    pub fn init(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        Ok(Self::from_git2(repo, path))
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Set the signature for commits.
    pub fn with_signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// The identity note commits are written with.
    pub fn signature(&self) -> &GitSignature {
        &self.signature
    }

    /// Execute a function with access to the repository.
    pub fn with_repo<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Repository) -> StorageResult<T>,
    {
        let repo = self.repo.lock();
        f(&repo)
    }

    // ==================== Refs ====================

    /// Current value of a ref, or None if it does not exist.
    pub fn read_ref(&self, name: &RefName) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| RefManager::read_ref(repo, name))
    }

    /// Check if a ref exists.
    pub fn ref_exists(&self, name: &RefName) -> StorageResult<bool> {
        self.with_repo(|repo| Ok(RefManager::ref_exists(repo, name)))
    }

    /// Atomically move a ref from `expected` to `new_target`.
    pub fn compare_and_swap(
        &self,
        name: &RefName,
        expected: Option<CommitId>,
        new_target: CommitId,
        log_message: &str,
    ) -> StorageResult<RefUpdate> {
        self.with_repo(|repo| RefManager::compare_and_swap(repo, name, expected, new_target, log_message))
    }

    // ==================== Objects ====================

    /// Store bytes as a blob.
    pub fn write_blob(&self, bytes: &[u8]) -> StorageResult<BlobId> {
        self.with_repo(|repo| blob::write_blob(repo, bytes))
    }

    /// Read a blob's raw bytes.
    pub fn read_blob(&self, id: BlobId) -> StorageResult<Vec<u8>> {
        self.with_repo(|repo| blob::read_blob(repo, id))
    }

    /// Read a blob as text; invalid UTF-8 is replaced, never an error.
    pub fn read_blob_text(&self, id: BlobId) -> StorageResult<String> {
        self.with_repo(|repo| blob::read_blob_text(repo, id))
    }

    /// Create a commit (not attached to any ref) with this repository's signature.
    pub fn commit(&self, tree: TreeId, parents: Vec<CommitId>, message: &str) -> StorageResult<CommitId> {
        self.with_repo(|repo| {
            CommitBuilder::new(repo)
                .tree(tree)
                .parents(parents)
                .message(message)
                .signature(self.signature.clone())
                .commit()
        })
    }

    /// Get information about a commit.
    pub fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.with_repo(|repo| commit::get_commit(repo, id))
    }

    // ==================== Graph ====================

    /// Resolve a revision to a commit, or None if it names nothing.
    pub fn resolve_commit(&self, spec: &str) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| commit::resolve_commit(repo, spec))
    }

    /// Nearest common ancestor of two commits.
    pub fn merge_base(&self, a: CommitId, b: CommitId) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| commit::find_merge_base(repo, a, b))
    }

    /// Whether `ancestor` is reachable from `descendant`.
    pub fn is_ancestor(&self, ancestor: CommitId, descendant: CommitId) -> StorageResult<bool> {
        self.with_repo(|repo| commit::is_ancestor(repo, ancestor, descendant))
    }

    /// Oldest commit reachable from `tip` but not from `hide`.
    pub fn first_commit_after(&self, tip: CommitId, hide: CommitId) -> StorageResult<Option<CommitId>> {
        self.with_repo(|repo| commit::first_commit_after(repo, tip, hide))
    }

    /// Get diff between two commits.
    pub fn diff(&self, old: CommitId, new: CommitId) -> StorageResult<Vec<Change>> {
        self.with_repo(|repo| commit::diff_commits(repo, old, new))
    }

    // ==================== Remote ====================

    /// Fetch refspecs (wildcards allowed) from a remote.
    pub fn fetch(&self, remote_name: &str, refspecs: &[&str]) -> StorageResult<()> {
        self.with_repo(|repo| remote::fetch(repo, remote_name, refspecs))
    }

    /// Push explicit refspecs to a remote.
    pub fn push(&self, remote_name: &str, refspecs: &[String]) -> StorageResult<()> {
        self.with_repo(|repo| remote::push(repo, remote_name, refspecs))
    }

    /// Push every local ref matched by a wildcard refspec.
    pub fn push_matching(&self, remote_name: &str, refspec: &str) -> StorageResult<()> {
        self.with_repo(|repo| remote::push_matching(repo, remote_name, refspec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::tree::TreeMutator;
    use tempfile::TempDir;

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn empty_tree(repo: &GitRepository) -> TreeId {
        repo.with_repo(|r| TreeMutator::empty(r)?.write()).unwrap()
    }

    #[test]
    fn test_init_and_open() {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        let c1 = repo.commit(empty_tree(&repo), vec![], "c1").unwrap();
        drop(repo);

        let repo = GitRepository::open(dir.path()).unwrap();
        assert_eq!(repo.get_commit(c1).unwrap().summary(), "c1");
    }

    #[test]
    fn test_open_missing() {
        let dir = TempDir::new().unwrap();
        let result = GitRepository::open(dir.path().join("nope"));
        assert!(matches!(result, Err(StorageError::NotInitialized(_))));
    }

    #[test]
    fn test_discover_from_subdirectory() {
        let (dir, _repo) = setup();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        let found = GitRepository::discover(&nested).unwrap();
        assert_eq!(
            found.path().canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_signature_from_config() {
        let (_dir, repo) = setup();
        repo.with_repo(|r| {
            let mut cfg = r.config()?;
            cfg.set_str("user.name", "Reviewer")?;
            cfg.set_str("user.email", "reviewer@example.com")?;
            Ok(())
        })
        .unwrap();

        let reopened = GitRepository::open(repo.path()).unwrap();
        assert_eq!(reopened.signature().email, "reviewer@example.com");

        let c1 = reopened.commit(empty_tree(&reopened), vec![], "signed").unwrap();
        assert_eq!(reopened.get_commit(c1).unwrap().author_name, "Reviewer");

        let custom = reopened.with_signature(GitSignature::new("Bot", "bot@example.com"));
        assert_eq!(custom.signature().name, "Bot");
    }

    #[test]
    fn test_ref_cas_through_wrapper() {
        let (_dir, repo) = setup();
        let name = RefName::new("refs/notes/devtools/discuss").unwrap();
        let c1 = repo.commit(empty_tree(&repo), vec![], "c1").unwrap();

        assert_eq!(repo.read_ref(&name).unwrap(), None);
        assert_eq!(repo.compare_and_swap(&name, None, c1, "create").unwrap(), RefUpdate::New);
        assert!(repo.ref_exists(&name).unwrap());
        assert_eq!(repo.read_ref(&name).unwrap(), Some(c1));
    }

    #[test]
    fn test_blob_roundtrip() {
        let (_dir, repo) = setup();
        let id = repo.write_blob(b"{\"a\":1}\n").unwrap();
        assert_eq!(repo.read_blob_text(id).unwrap(), "{\"a\":1}\n");
    }
}
