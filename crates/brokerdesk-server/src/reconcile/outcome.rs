//! Per-item outcomes of batch topic operations.

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// Outcome class of one item in a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TopicStatus {
    /// The requested change was made.
    Fine,
    /// The requested state already held; nothing changed.
    What,
    /// The broker rejected the operation or did not answer in time.
    Error,
    /// The request item itself is invalid, or references an unknown topic.
    ClientError,
    /// The broker call succeeded but persisting it failed.
    ServerError,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicResult {
    pub status: TopicStatus,
    pub message: String,
}

impl TopicResult {
    pub fn new(status: TopicStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

/// Results of a batch, in the order the items were processed.
///
/// On the wire a batch is `{"result": {<topic>: {status, message}}}`. When
/// a topic occurs twice the later result is the one shown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    items: Vec<(String, TopicResult)>,
}

impl BatchReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, topic: impl Into<String>, result: TopicResult) {
        self.items.push((topic.into(), result));
    }

    #[cfg(test)]
    pub(crate) fn items(&self) -> &[(String, TopicResult)] {
        &self.items
    }

    /// Every item, including shadowed duplicates, succeeded.
    pub fn all_fine(&self) -> bool {
        self.items
            .iter()
            .all(|(_, result)| result.status == TopicStatus::Fine)
    }

    /// Status of the last occurrence of `topic`.
    pub fn status_of(&self, topic: &str) -> Option<TopicStatus> {
        self.items
            .iter()
            .rev()
            .find(|(t, _)| t == topic)
            .map(|(_, result)| result.status)
    }
}

impl Serialize for BatchReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let by_topic: BTreeMap<&str, &TopicResult> = self
            .items
            .iter()
            .map(|(topic, result)| (topic.as_str(), result))
            .collect();

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("result", &by_topic)?;
        map.end()
    }
}
