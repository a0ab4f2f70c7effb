//! appraise-notes - code review records in git notes
//!
//! Reviews and review comments are stored as append-only logs attached to
//! commits with git notes, under `refs/notes/devtools/reviews` and
//! `refs/notes/devtools/discuss`. There is no server: clones exchange the
//! notes refs with a shared remote and merge concurrent writes by keeping
//! every record both sides wrote.
//!
//! # Example
//!
//! ```no_run
//! use appraise_notes::client::{ClientConfig, ReviewClient};
//!
//! let client = ReviewClient::open(ClientConfig::new(".")).unwrap();
//! client.write_comment_text("HEAD", "looks good").unwrap();
//! for review in client.list_reviews().unwrap() {
//!     println!("{} {}", review.hash, review.review.description.unwrap_or_default());
//! }
//! ```

pub mod client;
pub mod notes;
pub mod record;
pub mod storage;
pub mod sync;

#[cfg(test)]
mod testing;
