//! typed records stored in note logs
//!
//! reviews live in the reviews namespace and only the newest one counts,
//! comments live in the comments namespace and every line is its own comment.

mod codec;
mod comment;
mod review;

pub use codec::{comment_id, current_review, decode_comments, decode_log, encode_line, LogOrigin};
pub use comment::{replies_to, Comment, CommentResult, Location, Range};
pub use review::{Review, ReviewResult};

pub(crate) use review::non_empty;
