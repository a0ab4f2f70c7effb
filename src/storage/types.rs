//! core type-safe wrappers around git primitives for the storage layer.

use std::fmt;
use std::path::PathBuf;

use git2::Oid;

/// This makes sure we don't accidentally pass a blob ID where a commit ID
/// is expected. The inner Oid is only accessible within the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommitId(pub(crate) Oid);

impl CommitId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    /// raw Oid (for internal use only)
    pub(crate) fn raw(&self) -> Oid {
        self.0
    }

    /// parse CommitId from a hex string
    ///
    /// abbreviated hex is zero-padded, the way git2 parses object ids
    pub fn from_hex(hex: &str) -> Result<Self, git2::Error> {
        Oid::from_str(hex).map(CommitId)
    }

    /// short form of the commit ID
    pub fn short(&self) -> String {
        self.0.to_string()[..7].to_string()
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git blob identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlobId(pub(crate) Oid);

impl BlobId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Git tree identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeId(pub(crate) Oid);

impl TreeId {
    pub(crate) fn new(oid: Oid) -> Self {
        Self(oid)
    }

    pub(crate) fn raw(&self) -> Oid {
        self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fully qualified ref name (e.g. `refs/notes/devtools/reviews`).
///
/// git is more permissive than this, but every ref we touch lives under
/// `refs/` and never needs the exotic forms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefName(String);

impl RefName {
    /// the prefix every ref name must carry
    pub const PREFIX: &'static str = "refs/";

    /// create a new RefName
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidNameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidNameError::Empty);
        }
        if !name.starts_with(Self::PREFIX) {
            return Err(InvalidNameError::MissingPrefix(name));
        }
        if name.contains("..") || name.ends_with('/') || name.ends_with(".lock") {
            return Err(InvalidNameError::InvalidPath(name));
        }
        for (i, c) in name.chars().enumerate() {
            if c.is_ascii_control() || matches!(c, ' ' | '~' | '^' | ':' | '?' | '[' | '\\') {
                return Err(InvalidNameError::InvalidCharacter { char: c, position: i });
            }
        }
        Ok(Self(name))
    }

    /// wrap a ref name fixed at compile time
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "invalid ref name: {}", name);
        Self(name.to_string())
    }

    /// ref name for a local branch (e.g. "refs/heads/main")
    pub fn branch(name: &str) -> Result<Self, InvalidNameError> {
        match name.strip_prefix("refs/") {
            Some(_) => Self::new(name),
            None => Self::new(format!("refs/heads/{}", name)),
        }
    }

    /// get the full name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RefName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RefName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// git signature (author/committer info)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// fallback signature when the repository has no identity configured
    pub fn tool() -> Self {
        Self::new("appraise-notes", "appraise-notes@localhost")
    }

    /// read `user.name` / `user.email` from the repository's git config
    pub(crate) fn from_repo_config(repo: &git2::Repository) -> Option<Self> {
        let sig = repo.signature().ok()?;
        Some(Self::new(sig.name()?, sig.email()?))
    }

    /// convert to git2::Signature
    pub(crate) fn to_git2_signature(&self) -> Result<git2::Signature<'static>, git2::Error> {
        git2::Signature::now(&self.name, &self.email)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::tool()
    }
}

/// error type for invalid names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidNameError {
    Empty,
    MissingPrefix(String),
    InvalidCharacter { char: char, position: usize },
    InvalidPath(String),
}

impl fmt::Display for InvalidNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name cannot be empty"),
            Self::MissingPrefix(name) => write!(f, "'{}' does not start with refs/", name),
            Self::InvalidCharacter { char, position } => {
                write!(f, "invalid character '{}' at position {}", char, position)
            }
            Self::InvalidPath(path) => write!(f, "invalid path: '{}'", path),
        }
    }
}

impl std::error::Error for InvalidNameError {}

/// represents a change in a diff between commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub path: PathBuf,
    pub status: ChangeStatus,
}

/// the type of change in a diff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    Added,
    Deleted,
    Modified,
    Renamed,
    Copied,
    Other,
}

/// outcome of a compare-and-swap ref update
///
/// `New`, `NoChange`, `FastForward` and `Forced` mean the ref now holds the
/// requested value. `LockFailure` and `Rejected` mean nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefUpdate {
    /// the ref did not exist and was created
    New,
    /// the ref already held the new value
    NoChange,
    /// the new value descends from the old one
    FastForward,
    /// the new value does not descend from the old one
    Forced,
    /// another process holds the ref's lock
    LockFailure,
    /// the ref's current value differs from the expected one
    Rejected,
}

impl RefUpdate {
    /// whether the ref now points at the requested commit
    pub fn is_success(self) -> bool {
        matches!(
            self,
            RefUpdate::New | RefUpdate::NoChange | RefUpdate::FastForward | RefUpdate::Forced
        )
    }
}

impl fmt::Display for RefUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefUpdate::New => "NEW",
            RefUpdate::NoChange => "NO_CHANGE",
            RefUpdate::FastForward => "FAST_FORWARD",
            RefUpdate::Forced => "FORCED",
            RefUpdate::LockFailure => "LOCK_FAILURE",
            RefUpdate::Rejected => "REJECTED",
        };
        f.write_str(name)
    }
}
