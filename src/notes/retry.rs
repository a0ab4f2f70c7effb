//! retry policy for contended ref updates, and the clock it sleeps on

use std::time::Duration;

use tracing::debug;

use crate::storage::{CommitId, GitRepository, RefName, RefUpdate, StorageError, StorageResult};

/// Source of time for record timestamps and retry backoff.
///
/// Passed explicitly to whatever needs it so tests can run without real
/// sleeps.
pub trait Clock: Send + Sync {
    /// seconds since the unix epoch
    fn now_seconds(&self) -> i64;

    /// block the calling thread
    fn sleep(&self, duration: Duration);
}

/// The wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_seconds(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// How long to keep trying a ref whose lock another process holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// total attempts before giving up on a held lock
    pub max_lock_failures: u32,
    /// pause between attempts
    pub lock_failure_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_lock_failures: 10,
            lock_failure_backoff: Duration::from_millis(25),
        }
    }
}

/// compare-and-swap `reference`, retrying while its lock is held
///
/// returns the first result that is not a lock failure, so `Rejected` is
/// left to the caller. Running out of attempts is
/// [`StorageError::LockFailure`].
pub(crate) fn update_ref(
    repo: &GitRepository,
    policy: &RetryPolicy,
    clock: &dyn Clock,
    reference: &RefName,
    expected: Option<CommitId>,
    new_target: CommitId,
    message: &str,
) -> StorageResult<RefUpdate> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = repo.compare_and_swap(reference, expected, new_target, message)?;
        if result != RefUpdate::LockFailure {
            return Ok(result);
        }
        if attempts >= policy.max_lock_failures {
            return Err(StorageError::LockFailure {
                reference: reference.to_string(),
                attempts,
            });
        }
        debug!(reference = %reference, attempts, "ref locked, backing off");
        clock.sleep(policy.lock_failure_backoff);
    }
}
