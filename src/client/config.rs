//! client configuration

use std::path::PathBuf;

use crate::notes::RetryPolicy;
use crate::storage::GitSignature;

/// Client configuration options.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Any path inside the repository.
    pub path: PathBuf,
    /// Remote the notes are exchanged with.
    pub remote: String,
    /// Identity for records and note commits. Taken from the repository's
    /// git config when unset.
    pub signature: Option<GitSignature>,
    /// Backoff for contended ref updates.
    pub retry: RetryPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            remote: "origin".to_string(),
            signature: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientConfig {
    /// Create a new configuration for the repository at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Set the remote name.
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Set the identity used for records and commits.
    pub fn signature(mut self, signature: GitSignature) -> Self {
        self.signature = Some(signature);
        self
    }

    /// Set the retry policy.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}
