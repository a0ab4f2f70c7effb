//! Review client - high-level interface to reviews and comments.
//!
//! Every operation syncs with the remote first so reads see other users'
//! records and writes are less likely to need a merge.

use std::sync::Arc;

use tracing::info;

use crate::client::config::ClientConfig;
use crate::client::error::{ClientError, ClientResult};
use crate::notes::{Clock, Namespace, NoteMap, NoteMerger, NoteWriter, SystemClock, UnionMerger};
use crate::record::{
    comment_id, current_review, decode_comments, encode_line, non_empty, Comment, CommentResult,
    LogOrigin, Review, ReviewResult,
};
use crate::storage::{Change, CommitId, GitRepository, GitSignature, RefName, StorageError};
use crate::sync::{SyncEngine, SyncReport};

/// The main client handle.
pub struct ReviewClient {
    repo: GitRepository,
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    writer: NoteWriter,
    sync: SyncEngine,
}

impl ReviewClient {
    /// Open the repository containing `config.path`.
    pub fn open(config: ClientConfig) -> ClientResult<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Open with an explicit clock.
    pub fn with_clock(config: ClientConfig, clock: Arc<dyn Clock>) -> ClientResult<Self> {
        let mut repo = GitRepository::discover(&config.path)?;
        if let Some(signature) = &config.signature {
            repo = repo.with_signature(signature.clone());
        }

        let merger: Arc<dyn NoteMerger> = Arc::new(UnionMerger);
        let writer = NoteWriter::new(repo.clone(), config.retry, clock.clone(), merger.clone());
        let sync = SyncEngine::new(repo.clone(), config.remote.clone(), config.retry, clock.clone(), merger);

        Ok(Self {
            repo,
            config,
            clock,
            writer,
            sync,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn repo(&self) -> &GitRepository {
        &self.repo
    }

    /// the identity records are written as
    pub fn user(&self) -> &GitSignature {
        self.repo.signature()
    }

    // ==================== Sync ====================

    /// reconcile both namespaces with the remote
    pub fn sync(&self) -> ClientResult<SyncReport> {
        Ok(self.sync.sync()?)
    }

    /// publish local notes without reconciling
    pub fn push_notes(&self) -> ClientResult<()> {
        Ok(self.sync.push_all()?)
    }

    // ==================== Reviews ====================

    /// the current review of every reviewed commit, newest first
    pub fn list_reviews(&self) -> ClientResult<Vec<ReviewResult>> {
        self.sync()?;

        let head = self.repo.read_ref(&Namespace::Reviews.local_ref())?;
        let map = NoteMap::read(&self.repo, head)?;

        let mut reviews = Vec::with_capacity(map.len());
        let namespace = Namespace::Reviews.to_string();
        for (target, blob) in map.iter() {
            let log = self.repo.read_blob_text(blob)?;
            let hash = target.to_string();
            if let Some(review) = current_review(&log, LogOrigin::new(&namespace, &hash)) {
                reviews.push(ReviewResult::new(hash, self.user().clone(), review));
            }
        }
        reviews.sort_by(|a, b| b.review.timestamp.cmp(&a.review.timestamp));
        Ok(reviews)
    }

    /// the current review of one commit
    pub fn get_review(&self, target: &str) -> ClientResult<ReviewResult> {
        self.sync()?;
        let target = self.resolve_target(target)?;
        self.read_review(target)?
            .map(|review| ReviewResult::new(target.to_string(), self.user().clone(), review))
            .ok_or_else(|| ClientError::ReviewNotFound(target.to_string()))
    }

    /// request a review of `target`
    ///
    /// the review branch is pushed before the note so reviewers can fetch
    /// the commits it refers to
    pub fn create_review(&self, target: &str, mut review: Review) -> ClientResult<String> {
        let target_ref = non_empty(&review.target_ref)
            .ok_or_else(|| ClientError::Precondition("review has no target ref".into()))?;
        let review_ref = non_empty(&review.review_ref)
            .ok_or_else(|| ClientError::Precondition("review has no review ref".into()))?;
        if !can_request_review(review_ref, target_ref) {
            return Err(ClientError::Precondition(format!(
                "cannot request a review of {} onto itself",
                review_ref
            )));
        }
        let review_branch = branch_ref(review_ref)?;
        if !self.repo.ref_exists(&review_branch)? {
            return Err(ClientError::Precondition(format!(
                "review branch does not exist: {}",
                review_ref
            )));
        }
        let target = self.resolve_target(target)?;

        if review.requester.is_none() {
            review.requester = Some(self.user().email.clone());
        }
        if review.timestamp == 0 {
            review.timestamp = self.clock.now_seconds();
        }

        self.sync()?;
        self.repo
            .push(&self.config.remote, &[format!("{0}:{0}", review_branch)])?;
        self.append(Namespace::Reviews, target, &review)?;
        self.push_notes()?;

        info!(target = %target, review_ref = %review_branch, "review requested");
        Ok(target.to_string())
    }

    /// record a new version of the review if it differs from the current
    /// one, and optionally a comment; pushes once if anything was written
    pub fn update_review(&self, target: &str, review: Review, comment: Option<&str>) -> ClientResult<bool> {
        self.sync()?;
        let target = self.resolve_target(target)?;

        let mut changed = false;
        if self.read_review(target)?.as_ref() != Some(&review) {
            self.append(Namespace::Reviews, target, &review)?;
            changed = true;
        }
        if let Some(text) = comment.filter(|t| !t.is_empty()) {
            let comment = self.fill_comment(Comment::text(text));
            self.append(Namespace::Comments, target, &comment)?;
            changed = true;
        }

        if changed {
            self.push_notes()?;
        }
        Ok(changed)
    }

    // ==================== Comments ====================

    /// every comment on a commit, in log order
    pub fn list_comments(&self, target: &str) -> ClientResult<Vec<CommentResult>> {
        self.sync()?;
        let target = self.resolve_target(target)?;
        self.read_comments(target)
    }

    /// add a comment to a commit
    ///
    /// author and timestamp are filled in when unset
    pub fn write_comment(&self, target: &str, comment: Comment) -> ClientResult<CommentResult> {
        let target = self.resolve_target(target)?;
        let comment = self.fill_comment(comment);

        self.sync()?;
        let line = self.append(Namespace::Comments, target, &comment)?;
        self.push_notes()?;

        Ok(CommentResult {
            id: comment_id(&line),
            comment,
        })
    }

    /// add a plain text comment to a commit
    pub fn write_comment_text(&self, target: &str, text: &str) -> ClientResult<CommentResult> {
        self.write_comment(target, Comment::text(text))
    }

    // ==================== Code ====================

    /// first commit on `review_branch` that is not on `target_branch`
    pub fn review_commit(&self, review_branch: &str, target_branch: &str) -> ClientResult<CommitId> {
        let tip = self.resolve_revision(review_branch)?;
        let hide = self.resolve_revision(target_branch)?;
        self.repo.first_commit_after(tip, hide)?.ok_or_else(|| {
            ClientError::Precondition(format!(
                "{} has no commits that are not on {}",
                review_branch, target_branch
            ))
        })
    }

    /// whether `ancestor` is reachable from `descendant`
    ///
    /// a review is submitted once its review ref is an ancestor of its target
    pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> ClientResult<bool> {
        let ancestor = self.resolve_revision(ancestor)?;
        let descendant = self.resolve_revision(descendant)?;
        Ok(self.repo.is_ancestor(ancestor, descendant)?)
    }

    /// paths changed by the review attached to `target`
    pub fn review_diff(&self, target: &str) -> ClientResult<Vec<Change>> {
        let review = self.get_review(target)?.review;
        let commit = self.resolve_revision(target)?;

        let target_ref = non_empty(&review.target_ref)
            .ok_or_else(|| ClientError::Precondition(format!("review target ref not set: {}", target)))?;
        let Some(target_head) = self.repo.read_ref(&branch_ref(target_ref)?)? else {
            return Err(ClientError::Precondition(format!(
                "review target ref does not exist: {}, {}",
                target, target_ref
            )));
        };

        let Some(review_ref) = non_empty(&review.review_ref) else {
            // single commit review
            return Ok(self.repo.diff(self.parent_of(commit)?, commit)?);
        };

        if let Some(review_head) = self.repo.read_ref(&branch_ref(review_ref)?)? {
            if !self.repo.is_ancestor(review_head, target_head)? {
                return Ok(self.repo.diff(target_head, review_head)?);
            }
        }

        // the review is over: show everything up to the last commit anyone
        // commented on
        let comments = self.read_comments(commit)?;
        let last = self.last_commented_commit(&comments, commit)?;
        Ok(self.repo.diff(self.parent_of(commit)?, last)?)
    }

    // ==================== Internals ====================

    /// a revision, or failing that a literal commit hash
    fn resolve_target(&self, target: &str) -> ClientResult<CommitId> {
        if let Some(id) = self.repo.resolve_commit(target)? {
            return Ok(id);
        }
        let is_hex = !target.is_empty() && target.len() <= 40 && target.bytes().all(|b| b.is_ascii_hexdigit());
        if !is_hex {
            return Err(ClientError::InvalidTarget(target.to_string()));
        }
        CommitId::from_hex(target).map_err(|_| ClientError::InvalidTarget(target.to_string()))
    }

    fn resolve_revision(&self, revision: &str) -> ClientResult<CommitId> {
        self.repo
            .resolve_commit(revision)?
            .ok_or_else(|| StorageError::RevisionNotFound(revision.to_string()).into())
    }

    fn parent_of(&self, commit: CommitId) -> ClientResult<CommitId> {
        self.repo.get_commit(commit)?.first_parent().ok_or_else(|| {
            ClientError::Precondition(format!("review commit {} has no parent", commit.short()))
        })
    }

    /// the latest commit (by commit time) any comment points at
    fn last_commented_commit(&self, comments: &[CommentResult], default: CommitId) -> ClientResult<CommitId> {
        let mut last = default;
        let mut last_time = self.repo.get_commit(default)?.timestamp;
        for comment in comments {
            let Some(rev) = comment.comment.location.as_ref().and_then(|l| l.commit.as_deref()) else {
                continue;
            };
            let Some(id) = self.repo.resolve_commit(rev)? else {
                continue;
            };
            let time = self.repo.get_commit(id)?.timestamp;
            if time > last_time {
                last = id;
                last_time = time;
            }
        }
        Ok(last)
    }

    fn read_review(&self, target: CommitId) -> ClientResult<Option<Review>> {
        let head = self.repo.read_ref(&Namespace::Reviews.local_ref())?;
        let map = NoteMap::read(&self.repo, head)?;
        match map.get(target) {
            Some(blob) => {
                let log = self.repo.read_blob_text(blob)?;
                let (namespace, hash) = (Namespace::Reviews.to_string(), target.to_string());
                Ok(current_review(&log, LogOrigin::new(&namespace, &hash)))
            }
            None => Ok(None),
        }
    }

    fn read_comments(&self, target: CommitId) -> ClientResult<Vec<CommentResult>> {
        let head = self.repo.read_ref(&Namespace::Comments.local_ref())?;
        let map = NoteMap::read(&self.repo, head)?;
        match map.get(target) {
            Some(blob) => {
                let log = self.repo.read_blob_text(blob)?;
                let (namespace, hash) = (Namespace::Comments.to_string(), target.to_string());
                Ok(decode_comments(&log, LogOrigin::new(&namespace, &hash)))
            }
            None => Ok(Vec::new()),
        }
    }

    fn fill_comment(&self, mut comment: Comment) -> Comment {
        if comment.author.is_none() {
            comment.author = Some(self.user().email.clone());
        }
        if comment.timestamp == 0 {
            comment.timestamp = self.clock.now_seconds();
        }
        comment
    }

    /// encode and append one record, returning the stored line
    fn append<T: serde::Serialize>(&self, namespace: Namespace, target: CommitId, record: &T) -> ClientResult<String> {
        let line = encode_line(record)?;
        self.writer.append(namespace, target, &line)?;
        Ok(line)
    }
}

/// a review cannot target the branch it is requested from
pub fn can_request_review(review_ref: &str, target_ref: &str) -> bool {
    let normalize = |r: &str| RefName::branch(r).map(|n| n.to_string()).unwrap_or_else(|_| r.to_string());
    normalize(review_ref) != normalize(target_ref)
}

fn branch_ref(name: &str) -> ClientResult<RefName> {
    RefName::branch(name).map_err(|e| ClientError::Precondition(format!("invalid branch {}: {}", name, e)))
}
