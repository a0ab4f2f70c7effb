//! comment records

use serde::{Deserialize, Serialize};

use crate::record::codec::timestamp;

/// A review comment. Every line of a comment log is a separate comment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, with = "timestamp")]
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// id of the comment this one replies to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Comment {
    /// a plain comment with only a description
    pub fn text(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.unwrap_or(false)
    }
}

/// Where in the code a comment points.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,
}

/// A stored comment together with its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentResult {
    /// hash of the exact stored line
    pub id: String,
    pub comment: Comment,
}

impl CommentResult {
    /// whether this comment replies to `parent_id`
    pub fn is_reply_to(&self, parent_id: &str) -> bool {
        self.comment.parent.as_deref() == Some(parent_id)
    }
}

/// direct replies to `parent_id`, in log order
pub fn replies_to<'a>(comments: &'a [CommentResult], parent_id: &str) -> Vec<&'a CommentResult> {
    comments.iter().filter(|c| c.is_reply_to(parent_id)).collect()
}
