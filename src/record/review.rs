//! review records

use serde::{Deserialize, Serialize};

use crate::record::codec::timestamp;
use crate::storage::GitSignature;

/// One version of a review request.
///
/// A review is never edited in place. Each change appends a new record and
/// the one with the newest timestamp is current.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    /// branch holding the code under review
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_ref: Option<String>,
    /// branch the review is meant to land on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<String>,
    #[serde(default)]
    pub reviewers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// seconds since the unix epoch
    #[serde(default, with = "timestamp")]
    pub timestamp: i64,
}

impl Review {
    /// reviewers joined with commas
    pub fn reviewers_string(&self) -> String {
        self.reviewers.join(",")
    }

    /// replace the reviewers from a comma separated list
    pub fn set_reviewers_string(&mut self, reviewers: &str) {
        self.reviewers = reviewers
            .split(',')
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(String::from)
            .collect();
    }
}

pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// The current review of one target commit, seen by one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewResult {
    /// the target commit the review log is attached to
    pub hash: String,
    pub review: Review,
    pub current_user: GitSignature,
}

impl ReviewResult {
    pub fn new(hash: impl Into<String>, current_user: GitSignature, review: Review) -> Self {
        Self {
            hash: hash.into(),
            review,
            current_user,
        }
    }

    pub fn is_current_user_reviewer(&self) -> bool {
        self.review
            .reviewers
            .iter()
            .any(|r| self.matches_current_user(r))
    }

    pub fn is_current_user_requester(&self) -> bool {
        self.review
            .requester
            .as_deref()
            .is_some_and(|r| self.matches_current_user(r))
    }

    fn matches_current_user(&self, who: &str) -> bool {
        who == self.current_user.name || who == self.current_user.email
    }
}
