//! shared fixtures for unit tests: real repositories wired to a bare origin

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use git2::Repository;
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{Dispatch, Level};
use tracing_subscriber::fmt::MakeWriter;

use crate::notes::{Clock, Namespace, NoteMap};
use crate::storage::{CommitId, GitRepository, RefName, RefUpdate, TreeId, TreeMutator};

/// clock that never sleeps and remembers every requested sleep
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }
}

impl Clock for ManualClock {
    fn now_seconds(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

/// a commit with an empty tree
pub fn empty_commit(repo: &GitRepository, parents: Vec<CommitId>, message: &str) -> CommitId {
    let tree: TreeId = repo.with_repo(|r| TreeMutator::empty(r)?.write()).unwrap();
    repo.commit(tree, parents, message).unwrap()
}

/// replace `target`'s log with raw `content`, bypassing the writer, the way
/// a foreign client could
pub fn attach_raw_note(repo: &GitRepository, namespace: Namespace, target: CommitId, content: &[u8]) -> CommitId {
    let reference = namespace.local_ref();
    let head = repo.read_ref(&reference).unwrap();
    let mut map = NoteMap::read(repo, head).unwrap();
    map.set(target, repo.write_blob(content).unwrap());
    let tree = map.write_tree(repo).unwrap();
    let commit = repo.commit(tree, head.into_iter().collect(), "foreign note").unwrap();
    let result = repo.compare_and_swap(&reference, head, commit, "foreign note").unwrap();
    assert!(matches!(result, RefUpdate::New | RefUpdate::FastForward));
    commit
}

/// holds `<gitdir>/<ref>.lock` until dropped, the way a concurrent git
/// process would while updating the ref
pub struct RefLock(PathBuf);

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.0);
    }
}

pub fn hold_ref_lock(repo: &GitRepository, name: &RefName) -> RefLock {
    let git_dir = repo.with_repo(|r| Ok(r.path().to_path_buf())).unwrap();
    let path = git_dir.join(format!("{}.lock", name));
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"").unwrap();
    RefLock(path)
}

/// a bare origin plus `clones` working repositories pointing at it
pub struct Network {
    pub dir: TempDir,
    pub origin: PathBuf,
    pub clones: Vec<GitRepository>,
}

impl Network {
    pub fn new(clones: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let origin = dir.path().join("origin.git");
        Repository::init_bare(&origin).unwrap();

        let clones = (0..clones)
            .map(|i| clone_of(dir.path(), &origin, &format!("clone{}", i)))
            .collect();
        Self { dir, origin, clones }
    }

    /// open the bare origin directly
    pub fn origin_repo(&self) -> GitRepository {
        GitRepository::open(&self.origin).unwrap()
    }
}

fn clone_of(root: &Path, origin: &Path, name: &str) -> GitRepository {
    let path = root.join(name);
    let repo = Repository::init(&path).unwrap();
    repo.remote("origin", origin.to_str().unwrap()).unwrap();
    {
        let mut cfg = repo.config().unwrap();
        cfg.set_str("user.name", name).unwrap();
        cfg.set_str("user.email", &format!("{}@example.com", name)).unwrap();
    }
    drop(repo);
    GitRepository::open(&path).unwrap()
}

/// commit `content` at `path` on top of `branch` (creating it if needed)
pub fn commit_file(repo: &GitRepository, branch: &str, path: &str, content: &str) -> CommitId {
    let id = repo
        .with_repo(|r| {
            let refname = format!("refs/heads/{}", branch);
            let parent = r.find_reference(&refname).ok().and_then(|re| re.peel_to_commit().ok());

            let blob = r.blob(content.as_bytes())?;
            let mut builder = r.treebuilder(parent.as_ref().map(|p| p.tree()).transpose()?.as_ref())?;
            builder.insert(path, blob, git2::FileMode::Blob.into())?;
            let tree = r.find_tree(builder.write()?)?;

            let sig = git2::Signature::now("author", "author@example.com")?;
            let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
            let oid = r.commit(Some(&refname), &sig, &sig, &format!("edit {}", path), &tree, &parents)?;
            Ok(oid)
        })
        .unwrap();
    CommitId::from_hex(&id.to_string()).unwrap()
}

/// log sink shared between a test and the subscriber it installs
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// run `f` on this thread with WARN-and-above events captured as plain text
pub fn capture_warnings<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(buffer.clone())
        .with_max_level(Level::WARN)
        .with_ansi(false)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    let value = tracing::dispatcher::with_default(&dispatch, f);
    let logs = String::from_utf8_lossy(&buffer.0.lock()).into_owned();
    (value, logs)
}
