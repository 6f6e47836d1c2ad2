//! Allowed topic set.
//!
//! Loaded once at startup and shared read-only. Every subscribe and refresh
//! request is checked against it.

use std::collections::BTreeSet;

use super::errors::{RealtimeError, RealtimeResult};

/// Topics clients may subscribe to or refresh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedTopics {
    topics: BTreeSet<String>,
}

impl AllowedTopics {
    /// Build from topic names. Blank names are ignored.
    pub fn new<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let topics = topics
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        Self { topics }
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    /// Return the topic if allowed, `InvalidTopic` otherwise
    pub fn validate<'a>(&self, topic: &'a str) -> RealtimeResult<&'a str> {
        if self.contains(topic) {
            Ok(topic)
        } else {
            Err(RealtimeError::InvalidTopic(topic.to_string()))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.topics.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }
}
