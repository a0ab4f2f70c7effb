//! note logs on top of the storage layer
//!
//! a namespace ref points at a notes commit whose tree maps each target
//! commit to a blob of newline-delimited records. Logs only grow: writers
//! that race are merged with [`UnionMerger`], never overwritten.

mod map;
mod merger;
mod namespace;
mod retry;
mod writer;

pub use map::NoteMap;
pub use merger::{union_lines, NoteMerger, UnionMerger};
pub use namespace::{Namespace, FETCH_REFSPEC, PUSH_REFSPEC};
pub use retry::{Clock, RetryPolicy, SystemClock};
pub use writer::{Appended, NoteWriter, StagedAppend};

pub(crate) use retry::update_ref;
