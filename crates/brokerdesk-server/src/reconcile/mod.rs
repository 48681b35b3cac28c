//! Reconciliation of requested topic sets against the catalogue, the
//! ledgers and the live broker.
//!
//! A batch loads the ledger snapshot for its (broker, user) pair once and
//! then walks the requested topics in order, updating the snapshot after each
//! item so a later duplicate observes the earlier item's effect.

mod favourites;
mod outcome;
mod restore;
mod subscriptions;

use std::collections::HashMap;

pub use favourites::Favourites;
pub use outcome::{BatchReport, TopicResult, TopicStatus};
pub use restore::{RestoreSummary, restore_subscriptions};
pub use subscriptions::Subscriptions;

use crate::link::QoS;
use crate::storage::{Database, DatabaseError, Ledger};

/// QoS used for subscriptions when the request does not name one.
pub const DEFAULT_SUBSCRIBE_QOS: QoS = QoS::AtMostOnce;

/// Where a topic stands relative to one ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TopicState {
    /// Not in the catalogue.
    Unknown,
    /// Catalogued, no ledger row.
    Known(i64),
    /// Catalogued with a ledger row.
    Marked(i64),
}

/// In-memory copy of one ledger for a (broker, user) pair.
pub(crate) struct LedgerView {
    topics: HashMap<String, (i64, bool)>,
}

impl LedgerView {
    pub(crate) async fn load(
        db: &Database,
        ledger: Ledger,
        broker_id: i64,
        user_id: i64,
    ) -> Result<Self, DatabaseError> {
        let topics = db
            .ledger_snapshot(ledger, broker_id, user_id)
            .await?
            .into_iter()
            .map(|mark| (mark.topic, (mark.id, mark.marked)))
            .collect();
        Ok(Self { topics })
    }

    pub(crate) fn state(&self, topic: &str) -> TopicState {
        match self.topics.get(topic) {
            None => TopicState::Unknown,
            Some(&(id, false)) => TopicState::Known(id),
            Some(&(id, true)) => TopicState::Marked(id),
        }
    }

    pub(crate) fn set(&mut self, topic: &str, topic_id: i64, marked: bool) {
        self.topics.insert(topic.to_string(), (topic_id, marked));
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "reconcile_tests.rs"]
mod tests;
