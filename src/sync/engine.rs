//! Reconciling local note refs with the remote.
//!
//! After fetching every namespace into `refs/notes/origin/devtools/*`, each
//! namespace is classified by ancestry:
//!
//! ```text
//! origin absent            -> nothing to do
//! local absent             -> local := origin
//! local == origin          -> nothing to do
//! origin is merge base     -> push local
//! local is merge base      -> fast-forward local to origin
//! otherwise                -> merge commit (local, origin), then push
//! ```
//!
//! Every push names only the namespace being reconciled, so a namespace that
//! is still behind never turns a sync into a rejected push.

use std::sync::Arc;

use tracing::{debug, info};

use crate::notes::{self, Clock, Namespace, NoteMap, NoteMerger, RetryPolicy, FETCH_REFSPEC, PUSH_REFSPEC};
use crate::storage::{CommitId, CommitMessage, GitRepository, RefUpdate, StorageError, StorageResult};

/// What a sync did to one namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// the remote has never seen this namespace
    NotPublished,
    /// local and remote already agree
    UpToDate,
    /// local was behind (or absent) and now equals the remote
    FastForwarded(CommitId),
    /// local was ahead and the remote now has it
    Pushed,
    /// both sides had new records; the merge commit was pushed
    Merged(CommitId),
}

/// Per-namespace outcome of one [`SyncEngine::sync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub comments: SyncOutcome,
    pub reviews: SyncOutcome,
}

impl SyncReport {
    /// whether any local or remote ref moved
    pub fn changed_anything(&self) -> bool {
        [self.comments, self.reviews]
            .iter()
            .any(|o| !matches!(o, SyncOutcome::NotPublished | SyncOutcome::UpToDate))
    }
}

/// Fetch, classify, and reconcile both namespaces against one remote.
#[derive(Clone)]
pub struct SyncEngine {
    repo: GitRepository,
    remote: String,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    merger: Arc<dyn NoteMerger>,
}

impl SyncEngine {
    pub fn new(
        repo: GitRepository,
        remote: impl Into<String>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        merger: Arc<dyn NoteMerger>,
    ) -> Self {
        Self {
            repo,
            remote: remote.into(),
            policy,
            clock,
            merger,
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// bring both namespaces in line with the remote
    ///
    /// fetch failures abort the whole sync
    pub fn sync(&self) -> StorageResult<SyncReport> {
        self.repo.fetch(&self.remote, &[FETCH_REFSPEC])?;

        let mut report = SyncReport {
            comments: SyncOutcome::UpToDate,
            reviews: SyncOutcome::UpToDate,
        };
        for namespace in Namespace::SYNC_ORDER {
            let outcome = self.sync_namespace(namespace)?;
            debug!(namespace = %namespace, ?outcome, "namespace synced");
            match namespace {
                Namespace::Comments => report.comments = outcome,
                Namespace::Reviews => report.reviews = outcome,
            }
        }
        Ok(report)
    }

    /// publish every local namespace to the remote
    pub fn push_all(&self) -> StorageResult<()> {
        self.repo.push_matching(&self.remote, PUSH_REFSPEC)
    }

    fn sync_namespace(&self, namespace: Namespace) -> StorageResult<SyncOutcome> {
        let local_ref = namespace.local_ref();
        let Some(origin) = self.repo.read_ref(&namespace.origin_ref())? else {
            return Ok(SyncOutcome::NotPublished);
        };

        let Some(local) = self.repo.read_ref(&local_ref)? else {
            self.update_local(namespace, None, origin, &[RefUpdate::New, RefUpdate::FastForward])?;
            return Ok(SyncOutcome::FastForwarded(origin));
        };

        if local == origin {
            return Ok(SyncOutcome::UpToDate);
        }

        let base = self.repo.merge_base(local, origin)?;
        if base == Some(origin) {
            self.repo.push(&self.remote, &[namespace.push_refspec()])?;
            return Ok(SyncOutcome::Pushed);
        }
        if base == Some(local) {
            self.update_local(
                namespace,
                Some(local),
                origin,
                &[RefUpdate::FastForward, RefUpdate::NoChange],
            )?;
            return Ok(SyncOutcome::FastForwarded(origin));
        }

        let merged = NoteMap::merge(
            &self.repo,
            &NoteMap::read(&self.repo, base)?,
            &NoteMap::read(&self.repo, Some(local))?,
            &NoteMap::read(&self.repo, Some(origin))?,
            self.merger.as_ref(),
        )?;
        let tree = merged.write_tree(&self.repo)?;
        let merge = self.repo.commit(tree, vec![local, origin], &CommitMessage::merge_sync())?;

        let result = notes::update_ref(
            &self.repo,
            &self.policy,
            self.clock.as_ref(),
            &local_ref,
            Some(local),
            merge,
            &CommitMessage::merge_sync(),
        )?;
        match result {
            RefUpdate::Rejected => {
                return Err(StorageError::ConcurrentModification {
                    reference: local_ref.to_string(),
                })
            }
            r if !r.is_success() => {
                return Err(StorageError::UnexpectedRefUpdate {
                    reference: local_ref.to_string(),
                    result: r.to_string(),
                })
            }
            _ => {}
        }
        info!(namespace = %namespace, merge = %merge.short(), "merged local and remote notes");

        // only this namespace is reconciled so far; the other may still be behind
        self.repo.push(&self.remote, &[namespace.push_refspec()])?;
        Ok(SyncOutcome::Merged(merge))
    }

    /// move the local ref to the remote's value, accepting only `allowed`
    fn update_local(
        &self,
        namespace: Namespace,
        expected: Option<CommitId>,
        origin: CommitId,
        allowed: &[RefUpdate],
    ) -> StorageResult<()> {
        let local_ref = namespace.local_ref();
        let result = notes::update_ref(
            &self.repo,
            &self.policy,
            self.clock.as_ref(),
            &local_ref,
            expected,
            origin,
            "fast-forward notes",
        )?;
        if !allowed.contains(&result) {
            return Err(StorageError::UnexpectedRefUpdate {
                reference: local_ref.to_string(),
                result: result.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notes::{NoteWriter, UnionMerger};
    use crate::testing::{attach_raw_note, hold_ref_lock, ManualClock, Network};

    fn target() -> CommitId {
        CommitId::from_hex("deadbeef").unwrap()
    }

    fn parts(repo: &GitRepository, clock: Arc<dyn Clock>) -> (NoteWriter, SyncEngine) {
        let merger: Arc<dyn NoteMerger> = Arc::new(UnionMerger);
        (
            NoteWriter::new(repo.clone(), RetryPolicy::default(), clock.clone(), merger.clone()),
            SyncEngine::new(repo.clone(), "origin", RetryPolicy::default(), clock, merger),
        )
    }

    fn clock() -> Arc<dyn Clock> {
        Arc::new(ManualClock::new(0))
    }

    fn lines(repo: &GitRepository, namespace: Namespace) -> Vec<String> {
        let head = repo.read_ref(&namespace.local_ref()).unwrap();
        let map = NoteMap::read(repo, head).unwrap();
        let mut lines: Vec<String> = repo
            .read_blob_text(map.get(target()).unwrap())
            .unwrap()
            .lines()
            .map(String::from)
            .collect();
        lines.sort();
        lines
    }

    #[test]
    fn test_nothing_published() {
        let net = Network::new(1);
        let (_, engine) = parts(&net.clones[0], clock());

        let report = engine.sync().unwrap();
        assert_eq!(report.comments, SyncOutcome::NotPublished);
        assert_eq!(report.reviews, SyncOutcome::NotPublished);
        assert!(!report.changed_anything());
    }

    #[test]
    fn test_absent_local_fast_forwards() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (_, eb) = parts(&net.clones[1], clock());

        let c = wa.append(Namespace::Comments, target(), "nit").unwrap().commit;
        ea.push_all().unwrap();

        let report = eb.sync().unwrap();
        assert_eq!(report.comments, SyncOutcome::FastForwarded(c));
        assert_eq!(report.reviews, SyncOutcome::NotPublished);
        assert_eq!(net.clones[1].read_ref(&Namespace::Comments.local_ref()).unwrap(), Some(c));
        // no merge commit was made
        assert!(net.clones[1].get_commit(c).unwrap().parent_ids.is_empty());
    }

    #[test]
    fn test_sync_twice_is_idempotent() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (wb, eb) = parts(&net.clones[1], clock());

        wa.append(Namespace::Comments, target(), "a").unwrap();
        ea.push_all().unwrap();
        eb.sync().unwrap();
        wb.append(Namespace::Comments, target(), "b").unwrap();
        wa.append(Namespace::Comments, target(), "c").unwrap();
        eb.sync().unwrap();
        ea.sync().unwrap();

        let origin = net.origin_repo();
        let reference = Namespace::Comments.local_ref();
        let before = (
            net.clones[0].read_ref(&reference).unwrap(),
            origin.read_ref(&reference).unwrap(),
        );

        let report = ea.sync().unwrap();
        assert_eq!(report.comments, SyncOutcome::UpToDate);
        let report = ea.sync().unwrap();
        assert_eq!(report.comments, SyncOutcome::UpToDate);
        assert!(!report.changed_anything());

        let after = (
            net.clones[0].read_ref(&reference).unwrap(),
            origin.read_ref(&reference).unwrap(),
        );
        assert_eq!(before, after);
    }

    #[test]
    fn test_ahead_pushes_and_behind_fast_forwards() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (_, eb) = parts(&net.clones[1], clock());

        wa.append(Namespace::Reviews, target(), "r1").unwrap();
        ea.push_all().unwrap();
        eb.sync().unwrap();

        let c2 = wa.append(Namespace::Reviews, target(), "r2").unwrap().commit;
        assert_eq!(ea.sync().unwrap().reviews, SyncOutcome::Pushed);
        assert_eq!(net.origin_repo().read_ref(&Namespace::Reviews.local_ref()).unwrap(), Some(c2));

        assert_eq!(eb.sync().unwrap().reviews, SyncOutcome::FastForwarded(c2));
        assert_eq!(net.clones[1].read_ref(&Namespace::Reviews.local_ref()).unwrap(), Some(c2));
    }

    #[test]
    fn test_concurrent_comments_converge() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (wb, eb) = parts(&net.clones[1], clock());

        wa.append(Namespace::Comments, target(), "base").unwrap();
        ea.push_all().unwrap();
        eb.sync().unwrap();

        // both write before either pushes
        wa.append(Namespace::Comments, target(), r#"{"description":"nit"}"#).unwrap();
        let b_local = wb.append(Namespace::Comments, target(), r#"{"description":"lgtm"}"#).unwrap().commit;

        assert_eq!(ea.sync().unwrap().comments, SyncOutcome::Pushed);
        let a_pushed = net.origin_repo().read_ref(&Namespace::Comments.local_ref()).unwrap().unwrap();

        let merge = match eb.sync().unwrap().comments {
            SyncOutcome::Merged(id) => id,
            other => panic!("expected a merge, got {:?}", other),
        };
        let info = net.clones[1].get_commit(merge).unwrap();
        assert_eq!(info.parent_ids, vec![b_local, a_pushed]);
        assert_eq!(info.message, "Merged note commits\n");
        assert_eq!(net.origin_repo().read_ref(&Namespace::Comments.local_ref()).unwrap(), Some(merge));

        assert_eq!(ea.sync().unwrap().comments, SyncOutcome::FastForwarded(merge));

        let expected = vec![
            "base".to_string(),
            r#"{"description":"lgtm"}"#.to_string(),
            r#"{"description":"nit"}"#.to_string(),
        ];
        assert_eq!(lines(&net.clones[0], Namespace::Comments), expected);
        assert_eq!(lines(&net.clones[1], Namespace::Comments), expected);
    }

    /// both clones write one comment concurrently, then `first` syncs before
    /// the other; returns each clone's final comment lines
    fn converge(first: usize) -> (Vec<String>, Vec<String>) {
        let net = Network::new(2);
        let clock = clock();
        let nodes: Vec<_> = net.clones.iter().map(|repo| parts(repo, clock.clone())).collect();
        let second = 1 - first;

        nodes[0].0.append(Namespace::Comments, target(), "base").unwrap();
        nodes[0].1.push_all().unwrap();
        nodes[1].1.sync().unwrap();

        nodes[0].0.append(Namespace::Comments, target(), "from clone0").unwrap();
        nodes[1].0.append(Namespace::Comments, target(), "from clone1").unwrap();

        assert_eq!(nodes[first].1.sync().unwrap().comments, SyncOutcome::Pushed);
        let merge = match nodes[second].1.sync().unwrap().comments {
            SyncOutcome::Merged(id) => id,
            other => panic!("expected a merge, got {:?}", other),
        };
        assert_eq!(nodes[first].1.sync().unwrap().comments, SyncOutcome::FastForwarded(merge));

        (lines(&net.clones[0], Namespace::Comments), lines(&net.clones[1], Namespace::Comments))
    }

    #[test]
    fn test_convergence_in_either_order() {
        let expected = vec!["base".to_string(), "from clone0".to_string(), "from clone1".to_string()];
        for first in [0, 1] {
            let (zero, one) = converge(first);
            assert_eq!(zero, expected, "clone0 pushed first: {}", first == 0);
            assert_eq!(one, expected, "clone0 pushed first: {}", first == 0);
        }
    }

    #[test]
    fn test_merge_while_other_namespace_behind() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (wb, eb) = parts(&net.clones[1], clock());

        wa.append(Namespace::Reviews, target(), "r1").unwrap();
        wa.append(Namespace::Comments, target(), "base").unwrap();
        ea.push_all().unwrap();
        eb.sync().unwrap();

        // a moves both namespaces, b only writes a comment
        let r2 = wa.append(Namespace::Reviews, target(), "r2").unwrap().commit;
        wa.append(Namespace::Comments, target(), "from a").unwrap();
        ea.sync().unwrap();
        wb.append(Namespace::Comments, target(), "from b").unwrap();

        let report = eb.sync().unwrap();
        let merge = match report.comments {
            SyncOutcome::Merged(id) => id,
            other => panic!("expected a merge, got {:?}", other),
        };
        assert_eq!(report.reviews, SyncOutcome::FastForwarded(r2));

        let origin = net.origin_repo();
        assert_eq!(origin.read_ref(&Namespace::Comments.local_ref()).unwrap(), Some(merge));
        assert_eq!(origin.read_ref(&Namespace::Reviews.local_ref()).unwrap(), Some(r2));
        assert_eq!(net.clones[1].read_ref(&Namespace::Reviews.local_ref()).unwrap(), Some(r2));
        assert_eq!(lines(&net.clones[1], Namespace::Comments), vec!["base", "from a", "from b"]);
    }

    #[test]
    fn test_merge_while_other_namespace_ahead() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (wb, eb) = parts(&net.clones[1], clock());

        wa.append(Namespace::Reviews, target(), "r1").unwrap();
        wa.append(Namespace::Comments, target(), "base").unwrap();
        ea.push_all().unwrap();
        eb.sync().unwrap();

        wa.append(Namespace::Comments, target(), "from a").unwrap();
        ea.sync().unwrap();
        wb.append(Namespace::Comments, target(), "from b").unwrap();
        let r2 = wb.append(Namespace::Reviews, target(), "r2").unwrap().commit;

        let report = eb.sync().unwrap();
        assert!(matches!(report.comments, SyncOutcome::Merged(_)));
        assert_eq!(report.reviews, SyncOutcome::Pushed);
        assert_eq!(net.origin_repo().read_ref(&Namespace::Reviews.local_ref()).unwrap(), Some(r2));
    }

    #[test]
    fn test_merge_keeps_undecodable_log() {
        let net = Network::new(2);
        let (_, ea) = parts(&net.clones[0], clock());
        let (wb, eb) = parts(&net.clones[1], clock());

        attach_raw_note(&net.clones[0], Namespace::Comments, target(), b"{\xff}\n");
        ea.push_all().unwrap();
        wb.append(Namespace::Comments, target(), "from b").unwrap();

        assert!(matches!(eb.sync().unwrap().comments, SyncOutcome::Merged(_)));
        assert_eq!(lines(&net.clones[1], Namespace::Comments), vec!["from b", "{\u{fffd}}"]);
    }

    #[test]
    fn test_unrelated_histories_merge() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let (wb, eb) = parts(&net.clones[1], clock());

        wa.append(Namespace::Comments, target(), "from a").unwrap();
        wb.append(Namespace::Comments, target(), "from b").unwrap();
        ea.push_all().unwrap();

        assert!(matches!(eb.sync().unwrap().comments, SyncOutcome::Merged(_)));
        assert_eq!(lines(&net.clones[1], Namespace::Comments), vec!["from a", "from b"]);
    }

    #[test]
    fn test_locked_merge_gives_up() {
        let net = Network::new(2);
        let (wa, ea) = parts(&net.clones[0], clock());
        let manual = Arc::new(ManualClock::new(0));
        let (wb, eb) = parts(&net.clones[1], manual.clone());

        wa.append(Namespace::Comments, target(), "a").unwrap();
        let b_local = wb.append(Namespace::Comments, target(), "b").unwrap().commit;
        ea.push_all().unwrap();

        let _lock = hold_ref_lock(&net.clones[1], &Namespace::Comments.local_ref());
        let err = eb.sync().unwrap_err();
        assert!(err.is_lock_failure());
        assert_eq!(manual.sleeps().len(), 9);
        assert_eq!(net.clones[1].read_ref(&Namespace::Comments.local_ref()).unwrap(), Some(b_local));
    }

    #[test]
    fn test_missing_remote_is_fatal() {
        let net = Network::new(1);
        let merger: Arc<dyn NoteMerger> = Arc::new(UnionMerger);
        let engine = SyncEngine::new(net.clones[0].clone(), "upstream", RetryPolicy::default(), clock(), merger);
        assert!(matches!(engine.sync(), Err(StorageError::RemoteNotFound(_))));
    }
}
