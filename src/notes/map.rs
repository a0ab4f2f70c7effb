//! Note maps: target commit -> log blob, as stored in a notes commit's tree.

use std::collections::BTreeMap;

use crate::notes::merger::NoteMerger;
use crate::storage::{
    get_tree_at_commit, BlobId, CommitId, GitRepository, StorageResult, TreeId, TreeMutator,
};

/// In-memory view of one notes commit.
///
/// Reading is eager; nothing is written back until [`NoteMap::write_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteMap {
    entries: BTreeMap<CommitId, BlobId>,
}

impl NoteMap {
    /// the map of a namespace nobody has written to yet
    pub fn empty() -> Self {
        Self::default()
    }

    /// load the note map at `commit`, or an empty map for `None`
    pub fn read(repo: &GitRepository, commit: Option<CommitId>) -> StorageResult<Self> {
        let Some(commit) = commit else {
            return Ok(Self::empty());
        };
        repo.with_repo(|r| {
            let tree = get_tree_at_commit(r, commit)?;
            let mut entries = BTreeMap::new();
            for (hex, blob) in tree.note_entries(r)? {
                entries.insert(CommitId::from_hex(&hex)?, blob);
            }
            Ok(Self { entries })
        })
    }

    /// log blob attached to `target`
    pub fn get(&self, target: CommitId) -> Option<BlobId> {
        self.entries.get(&target).copied()
    }

    /// attach `blob` to `target`, replacing any previous log
    pub fn set(&mut self, target: CommitId, blob: BlobId) {
        self.entries.insert(target, blob);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// all (target, blob) pairs in target order
    pub fn iter(&self) -> impl Iterator<Item = (CommitId, BlobId)> + '_ {
        self.entries.iter().map(|(t, b)| (*t, *b))
    }

    /// persist as a flat notes tree
    pub fn write_tree(&self, repo: &GitRepository) -> StorageResult<TreeId> {
        repo.with_repo(|r| {
            let mut tree = TreeMutator::empty(r)?;
            for (target, blob) in &self.entries {
                tree.upsert_blob(&target.to_string(), *blob)?;
            }
            tree.write()
        })
    }

    /// three-way merge of two descendants of `base`
    ///
    /// per target: a side equal to base yields the other side, equal sides
    /// are kept, and a target changed on both sides goes to `merger`.
    /// A target one side removed while the other changed it keeps the change.
    pub fn merge(
        repo: &GitRepository,
        base: &NoteMap,
        ours: &NoteMap,
        theirs: &NoteMap,
        merger: &dyn NoteMerger,
    ) -> StorageResult<NoteMap> {
        let mut targets: Vec<CommitId> = ours.entries.keys().chain(theirs.entries.keys()).copied().collect();
        targets.sort();
        targets.dedup();

        let mut merged = NoteMap::empty();
        for target in targets {
            let b = base.get(target);
            let o = ours.get(target);
            let t = theirs.get(target);

            let resolved = if o == t {
                o
            } else if o == b {
                t
            } else if t == b {
                o
            } else {
                match (o, t) {
                    (Some(o), Some(t)) => Some(merger.merge(repo, b, o, t)?),
                    (Some(o), None) => Some(o),
                    (None, t) => t,
                }
            };

            if let Some(blob) = resolved {
                merged.set(target, blob);
            }
        }
        Ok(merged)
    }
}
