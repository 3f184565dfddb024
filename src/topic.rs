//! Topic naming
//!
//! Topics are dot-separated segments: `system.topic.subscribe`
//! Each segment must match: [a-zA-Z0-9_]+
//!
//! There are no wildcards; a subscription names exactly one topic.

use std::fmt;
use thiserror::Error;

/// Keep-alive topic; every frame on it is acknowledged with an empty response
pub const HEARTBEAT: &str = "system.heartbeat";

/// Control topic used to announce the client's identity
pub const SERVICE_REGISTER: &str = "system.service.register";

/// Control topic used to ask the broker for deliveries on a topic
pub const TOPIC_SUBSCRIBE: &str = "system.topic.subscribe";

/// Control topic used to stop deliveries on a topic
pub const TOPIC_UNSUBSCRIBE: &str = "system.topic.unsubscribe";

fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopicError {
    #[error("topic name cannot be empty")]
    Empty,

    #[error("empty segment in topic name")]
    EmptySegment,

    #[error("invalid segment '{0}': must match [a-zA-Z0-9_]+")]
    InvalidSegment(String),
}

/// A validated topic name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Parse and validate a topic name
    pub fn parse(name: &str) -> Result<Self, TopicError> {
        validate(name)?;
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Iterate over the dot-separated segments
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Check a topic name and report the first structural defect found.
///
/// Leading and trailing dots show up as an empty first or last segment.
pub fn validate(name: &str) -> Result<(), TopicError> {
    if name.is_empty() {
        return Err(TopicError::Empty);
    }

    for segment in name.split('.') {
        if segment.is_empty() {
            return Err(TopicError::EmptySegment);
        }
        if !segment.chars().all(is_valid_segment_char) {
            return Err(TopicError::InvalidSegment(segment.to_string()));
        }
    }

    Ok(())
}

/// Returns true if `name` is a well-formed topic
pub fn is_valid(name: &str) -> bool {
    validate(name).is_ok()
}
