//! Appending records to a namespace.
//!
//! An append is staged against the ref's current value, then published with
//! a compare-and-swap. Three things can happen to the swap:
//!
//! - the ref lock is held by another process: sleep and try the same swap
//!   again, giving up after [`RetryPolicy::max_lock_failures`] attempts
//! - the ref moved since we staged: merge our map with the new value under a
//!   two-parent commit and swap against the new value, with a fresh lock
//!   budget
//! - anything else that is not a success is an error
//!
//! Rejections are not bounded. Each one means another writer made progress.

use std::sync::Arc;

use tracing::{debug, info};

use crate::notes::map::NoteMap;
use crate::notes::merger::NoteMerger;
use crate::notes::namespace::Namespace;
use crate::notes::retry::{self, Clock, RetryPolicy};
use crate::storage::{CommitId, CommitMessage, GitRepository, RefUpdate, StorageError, StorageResult};

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// the namespace ref after the append
    pub commit: CommitId,
    /// false when the record was already in the log
    pub changed: bool,
    /// how many concurrent writers we had to merge with
    pub merges: u32,
}

/// Appends encoded records to per-target note logs.
#[derive(Clone)]
pub struct NoteWriter {
    repo: GitRepository,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    merger: Arc<dyn NoteMerger>,
}

impl NoteWriter {
    pub fn new(
        repo: GitRepository,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        merger: Arc<dyn NoteMerger>,
    ) -> Self {
        Self {
            repo,
            policy,
            clock,
            merger,
        }
    }

    /// append one encoded record line to `target`'s log in `namespace`
    pub fn append(&self, namespace: Namespace, target: CommitId, line: &str) -> StorageResult<Appended> {
        self.stage(namespace, target, line)?.publish()
    }

    /// build the candidate commit without touching the ref
    pub fn stage(&self, namespace: Namespace, target: CommitId, line: &str) -> StorageResult<StagedAppend<'_>> {
        let reference = namespace.local_ref();
        let message = namespace.write_message(&target.to_string());

        let base = self.repo.read_ref(&reference)?;
        let base_map = NoteMap::read(&self.repo, base)?;

        let mut ours = base_map.clone();
        let record = self.repo.write_blob(format!("{}\n", line.trim_end_matches('\n')).as_bytes())?;
        let log = match ours.get(target) {
            Some(existing) => self.merger.merge(&self.repo, None, existing, record)?,
            None => record,
        };
        ours.set(target, log);

        let candidate = if base.is_some() && ours == base_map {
            debug!(reference = %reference, target = %target.short(), "record already present");
            None
        } else {
            let tree = ours.write_tree(&self.repo)?;
            Some(self.repo.commit(tree, base.into_iter().collect(), &message)?)
        };

        Ok(StagedAppend {
            writer: self,
            namespace,
            base,
            base_map,
            ours,
            candidate,
            message,
        })
    }
}

/// An append whose commit exists but whose ref has not moved yet.
pub struct StagedAppend<'w> {
    writer: &'w NoteWriter,
    namespace: Namespace,
    base: Option<CommitId>,
    base_map: NoteMap,
    ours: NoteMap,
    candidate: Option<CommitId>,
    message: String,
}

impl StagedAppend<'_> {
    /// the commit this append will publish, None for a no-op
    pub fn candidate(&self) -> Option<CommitId> {
        self.candidate
    }

    /// swap the namespace ref to the candidate, merging with whoever got
    /// there first
    pub fn publish(self) -> StorageResult<Appended> {
        let StagedAppend {
            writer,
            namespace,
            mut base,
            mut base_map,
            mut ours,
            candidate,
            mut message,
        } = self;
        let repo = &writer.repo;
        let reference = namespace.local_ref();

        let Some(mut candidate) = candidate else {
            let commit = base.ok_or_else(|| StorageError::Internal("no-op append without a base".into()))?;
            return Ok(Appended {
                commit,
                changed: false,
                merges: 0,
            });
        };

        let mut merges = 0;
        loop {
            let result = retry::update_ref(
                repo,
                &writer.policy,
                writer.clock.as_ref(),
                &reference,
                base,
                candidate,
                &message,
            )?;

            match result {
                r if r.is_success() => {
                    debug!(reference = %reference, commit = %candidate.short(), merges, "record appended");
                    return Ok(Appended {
                        commit: candidate,
                        changed: true,
                        merges,
                    });
                }
                RefUpdate::Rejected => {
                    let Some(theirs) = repo.read_ref(&reference)? else {
                        // the ref was deleted under us; recreate it
                        base = None;
                        base_map = NoteMap::empty();
                        continue;
                    };

                    let theirs_map = NoteMap::read(repo, Some(theirs))?;
                    let merged = NoteMap::merge(repo, &base_map, &ours, &theirs_map, writer.merger.as_ref())?;
                    merges += 1;

                    if merged == theirs_map {
                        debug!(reference = %reference, "record already present after concurrent write");
                        return Ok(Appended {
                            commit: theirs,
                            changed: false,
                            merges,
                        });
                    }

                    let tree = merged.write_tree(repo)?;
                    message = CommitMessage::merge_records();
                    candidate = repo.commit(tree, vec![theirs, candidate], &message)?;
                    info!(reference = %reference, theirs = %theirs.short(), "merged with concurrent writer");

                    base = Some(theirs);
                    base_map = theirs_map;
                    ours = merged;
                }
                other => {
                    return Err(StorageError::UnexpectedRefUpdate {
                        reference: reference.to_string(),
                        result: other.to_string(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::merger::UnionMerger;
    use crate::testing::{hold_ref_lock, ManualClock};
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    const TARGET: &str = "deadbeef";

    fn setup() -> (TempDir, GitRepository) {
        let dir = TempDir::new().unwrap();
        let repo = GitRepository::init(dir.path()).unwrap();
        (dir, repo)
    }

    fn writer(repo: &GitRepository, clock: Arc<dyn Clock>) -> NoteWriter {
        NoteWriter::new(repo.clone(), RetryPolicy::default(), clock, Arc::new(UnionMerger))
    }

    fn target() -> CommitId {
        CommitId::from_hex(TARGET).unwrap()
    }

    fn log(repo: &GitRepository, namespace: Namespace) -> String {
        let head = repo.read_ref(&namespace.local_ref()).unwrap();
        let map = NoteMap::read(repo, head).unwrap();
        repo.read_blob_text(map.get(target()).unwrap()).unwrap()
    }

    #[test]
    fn test_first_append_creates_ref() {
        let (_dir, repo) = setup();
        let w = writer(&repo, Arc::new(ManualClock::new(0)));

        let appended = w.append(Namespace::Comments, target(), r#"{"description":"nit"}"#).unwrap();
        assert!(appended.changed);
        assert_eq!(appended.merges, 0);
        assert_eq!(repo.read_ref(&Namespace::Comments.local_ref()).unwrap(), Some(appended.commit));
        assert_eq!(log(&repo, Namespace::Comments), "{\"description\":\"nit\"}\n");

        let info = repo.get_commit(appended.commit).unwrap();
        assert!(info.parent_ids.is_empty());
        assert_eq!(info.message, format!("Writing comment for {}", target()));
        // the other namespace is untouched
        assert_eq!(repo.read_ref(&Namespace::Reviews.local_ref()).unwrap(), None);
    }

    #[test]
    fn test_appends_accumulate_in_order() {
        let (_dir, repo) = setup();
        let w = writer(&repo, Arc::new(ManualClock::new(0)));

        let first = w.append(Namespace::Reviews, target(), "one").unwrap();
        let second = w.append(Namespace::Reviews, target(), "two\n").unwrap();

        assert_eq!(log(&repo, Namespace::Reviews), "one\ntwo\n");
        assert_eq!(repo.get_commit(second.commit).unwrap().parent_ids, vec![first.commit]);
    }

    #[test]
    fn test_duplicate_append_is_noop() {
        let (_dir, repo) = setup();
        let w = writer(&repo, Arc::new(ManualClock::new(0)));

        let first = w.append(Namespace::Comments, target(), "same").unwrap();
        let again = w.append(Namespace::Comments, target(), "same").unwrap();

        assert!(!again.changed);
        assert_eq!(again.commit, first.commit);
        assert_eq!(log(&repo, Namespace::Comments), "same\n");
    }

    #[test]
    fn test_lock_failure_gives_up_after_ten_attempts() {
        let (_dir, repo) = setup();
        let clock = Arc::new(ManualClock::new(0));
        let w = writer(&repo, clock.clone());
        let seeded = w.append(Namespace::Comments, target(), "seed").unwrap();

        let _lock = hold_ref_lock(&repo, &Namespace::Comments.local_ref());
        let err = w.append(Namespace::Comments, target(), "blocked").unwrap_err();

        assert!(matches!(err, StorageError::LockFailure { attempts: 10, .. }));
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(25); 9]);
        assert_eq!(repo.read_ref(&Namespace::Comments.local_ref()).unwrap(), Some(seeded.commit));
    }

    /// releases the held lock after a number of sleeps
    struct ReleasingClock {
        lock: parking_lot::Mutex<Option<PathBuf>>,
        remaining: parking_lot::Mutex<u32>,
    }

    impl Clock for ReleasingClock {
        fn now_seconds(&self) -> i64 {
            0
        }

        fn sleep(&self, _duration: Duration) {
            let mut remaining = self.remaining.lock();
            *remaining -= 1;
            if *remaining == 0 {
                if let Some(path) = self.lock.lock().take() {
                    std::fs::remove_file(path).unwrap();
                }
            }
        }
    }

    #[test]
    fn test_lock_released_mid_retry() {
        let (dir, repo) = setup();
        let reference = Namespace::Comments.local_ref();
        let lock_path = dir.path().join(".git").join(format!("{}.lock", reference));
        let clock = Arc::new(ReleasingClock {
            lock: parking_lot::Mutex::new(Some(lock_path.clone())),
            remaining: parking_lot::Mutex::new(3),
        });
        let w = writer(&repo, clock.clone());
        w.append(Namespace::Comments, target(), "seed").unwrap();

        std::fs::write(&lock_path, b"").unwrap();
        let appended = w.append(Namespace::Comments, target(), "after wait").unwrap();

        assert!(appended.changed);
        assert_eq!(*clock.remaining.lock(), 0);
        assert_eq!(log(&repo, Namespace::Comments), "seed\nafter wait\n");
    }

    #[test]
    fn test_rejected_update_merges_with_concurrent_writer() {
        let (dir, repo) = setup();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let a = writer(&repo, clock.clone());
        // a second handle on the same repository stands in for another process
        let other = GitRepository::open(dir.path()).unwrap();
        let b = writer(&other, clock);

        a.append(Namespace::Comments, target(), "base").unwrap();

        let staged = a.stage(Namespace::Comments, target(), "nit").unwrap();
        let ours_candidate = staged.candidate().unwrap();
        let theirs = b.append(Namespace::Comments, target(), "lgtm").unwrap();

        let appended = staged.publish().unwrap();
        assert!(appended.changed);
        assert_eq!(appended.merges, 1);

        let merge = repo.get_commit(appended.commit).unwrap();
        assert_eq!(merge.parent_ids, vec![theirs.commit, ours_candidate]);
        assert_eq!(merge.message, "Merged note records\n");
        assert_eq!(log(&repo, Namespace::Comments), "base\nnit\nlgtm\n");
    }

    #[test]
    fn test_rejected_update_with_same_record() {
        let (dir, repo) = setup();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let a = writer(&repo, clock.clone());
        let other = GitRepository::open(dir.path()).unwrap();
        let b = writer(&other, clock);

        let staged = a.stage(Namespace::Reviews, target(), "same").unwrap();
        let theirs = b.append(Namespace::Reviews, target(), "same").unwrap();

        let appended = staged.publish().unwrap();
        assert!(!appended.changed);
        assert_eq!(appended.commit, theirs.commit);
    }

    #[test]
    fn test_many_writers_lose_nothing() {
        let (dir, repo) = setup();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0));
        let writers: Vec<NoteWriter> = (0..4)
            .map(|_| writer(&GitRepository::open(dir.path()).unwrap(), clock.clone()))
            .collect();

        // every writer stages against the same base before anyone publishes
        let staged: Vec<_> = writers
            .iter()
            .enumerate()
            .map(|(i, w)| w.stage(Namespace::Comments, target(), &format!("w{}", i)).unwrap())
            .collect();
        for s in staged {
            s.publish().unwrap();
        }

        let text = log(&repo, Namespace::Comments);
        for i in 0..4 {
            assert!(text.lines().any(|l| l == format!("w{}", i)), "missing w{} in {:?}", i, text);
        }
    }
}
