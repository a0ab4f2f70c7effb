//! sync engine: reconcile local note refs with a remote

mod engine;

pub use engine::{SyncEngine, SyncOutcome, SyncReport};
