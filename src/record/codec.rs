//! Line codec for note logs.
//!
//! A log is UTF-8 text with one JSON record per `\n`-terminated line. Lines
//! that fail to decode are skipped with a warning so one bad writer cannot
//! hide everyone else's records.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sha1::{Digest, Sha1};
use tracing::warn;

use crate::record::comment::{Comment, CommentResult};
use crate::record::review::Review;

/// encode one record as a single line, without the trailing newline
pub fn encode_line<T: Serialize>(record: &T) -> serde_json::Result<String> {
    serde_json::to_string(record)
}

/// Where a log was read from. Only used to point warnings at the bad writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOrigin<'a> {
    pub namespace: &'a str,
    pub target: &'a str,
}

impl<'a> LogOrigin<'a> {
    pub fn new(namespace: &'a str, target: &'a str) -> Self {
        Self { namespace, target }
    }
}

/// decode every well-formed line of a log, paired with its exact text
pub fn decode_log<'l, T: DeserializeOwned>(log: &'l str, origin: LogOrigin<'_>) -> Vec<(&'l str, T)> {
    let mut out = Vec::new();
    for (index, line) in log.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(line) {
            Ok(record) => out.push((line, record)),
            Err(e) => warn!(
                namespace = origin.namespace,
                commit = origin.target,
                line = index + 1,
                error = %e,
                "skipping malformed note record"
            ),
        }
    }
    out
}

/// the review with the greatest timestamp; the earliest line wins a tie
pub fn current_review(log: &str, origin: LogOrigin<'_>) -> Option<Review> {
    let mut current: Option<Review> = None;
    for (_, review) in decode_log::<Review>(log, origin) {
        match &current {
            Some(best) if best.timestamp >= review.timestamp => {}
            _ => current = Some(review),
        }
    }
    current
}

/// every comment in the log, in log order
pub fn decode_comments(log: &str, origin: LogOrigin<'_>) -> Vec<CommentResult> {
    decode_log::<Comment>(log, origin)
        .into_iter()
        .map(|(line, comment)| CommentResult {
            id: comment_id(line),
            comment,
        })
        .collect()
}

/// stable id of a stored comment: sha1 of its exact line
pub fn comment_id(line: &str) -> String {
    hex::encode(Sha1::digest(line.as_bytes()))
}

/// Seconds since the epoch, written as a number.
///
/// Some clients write the number as a string; both are accepted.
pub(crate) mod timestamp {
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(*value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }

    struct TimestampVisitor;

    impl<'de> Visitor<'de> for TimestampVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a decimal string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("timestamp out of range: {}", v)))
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid timestamp: {:?}", v)))
        }
    }
}
