//! note namespaces and the ref layout shared with every other client of the remote

use std::fmt;

use crate::storage::{CommitMessage, RefName};

/// fetch every published namespace into its origin mirror
pub const FETCH_REFSPEC: &str = "+refs/notes/devtools/*:refs/notes/origin/devtools/*";

/// publish every local namespace under the same name on the remote
pub const PUSH_REFSPEC: &str = "refs/notes/devtools/*:refs/notes/devtools/*";

/// A note namespace: one log per target commit, one ref per namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Reviews,
    Comments,
}

impl Namespace {
    /// comments go first so a review written together with its comment
    /// never lands on the remote without it
    pub const SYNC_ORDER: [Namespace; 2] = [Namespace::Comments, Namespace::Reviews];

    /// local ref holding this namespace
    pub fn local_ref(self) -> RefName {
        match self {
            Namespace::Reviews => RefName::from_static("refs/notes/devtools/reviews"),
            Namespace::Comments => RefName::from_static("refs/notes/devtools/discuss"),
        }
    }

    /// local mirror of the remote's copy of this namespace
    pub fn origin_ref(self) -> RefName {
        match self {
            Namespace::Reviews => RefName::from_static("refs/notes/origin/devtools/reviews"),
            Namespace::Comments => RefName::from_static("refs/notes/origin/devtools/discuss"),
        }
    }

    /// refspec publishing only this namespace
    pub fn push_refspec(self) -> String {
        let local = self.local_ref();
        format!("{}:{}", local, local)
    }

    /// commit message for appending one record to `target`'s log
    pub fn write_message(self, target: &str) -> String {
        match self {
            Namespace::Reviews => CommitMessage::write_review(target),
            Namespace::Comments => CommitMessage::write_comment(target),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Namespace::Reviews => f.write_str("reviews"),
            Namespace::Comments => f.write_str("comments"),
        }
    }
}
