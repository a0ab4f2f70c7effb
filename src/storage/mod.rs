//! storage layer for the note log
//!
//! this module is the object store adapter: a complete abstraction over git
//! for the notes layer above it. The notes, sync and client layers use this
//! API and never touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     GitRepository                           │
//! │   (refs with CAS, objects, graph queries, fetch / push)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌──────────────┬──────┴───────┬──────────────┐
//!        │              │              │              │
//!        ▼              ▼              ▼              ▼
//!  ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐
//!  │   tree    │  │   blob    │  │   refs    │  │  remote   │
//!  │(note maps)│  │  (logs)   │  │   (CAS)   │  │(fetch/push│
//!  └───────────┘  └───────────┘  └───────────┘  └───────────┘
//!        │              │              │
//!        └──────────────┼──────────────┘
//!                       ▼
//!                ┌─────────────┐
//!                │   commit    │
//!                │  (history)  │
//!                └─────────────┘
//!  ```

mod blob;
mod commit;
mod error;
mod refs;
mod remote;
mod repository;
mod tree;
mod types;

// Re-export public API
pub use commit::{CommitInfo, CommitMessage};
pub use error::{StorageError, StorageResult};
pub use repository::GitRepository;
pub use types::{
    BlobId, Change, ChangeStatus, CommitId, GitSignature, InvalidNameError, RefName, RefUpdate,
    TreeId,
};

// Re-export for internal use by the notes layer
pub(crate) use commit::get_tree_at_commit;
pub(crate) use tree::TreeMutator;
