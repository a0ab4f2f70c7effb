//! review and comment client
//!
//! the façade external callers use: every read syncs first, every write
//! appends through the note writer and then pushes.

mod api;
mod config;
mod error;

pub use api::{can_request_review, ReviewClient};
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};

// the clock and retry policy are part of the client's configuration surface
pub use crate::notes::{Clock, RetryPolicy, SystemClock};
