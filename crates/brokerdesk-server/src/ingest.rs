//! Inbound message ingestion.
//!
//! The link's event loop pushes every received PUBLISH into a bounded queue;
//! one worker per session drains it and persists each message. Every step is
//! fallible on its own and a failure only degrades the identifiers stored
//! with the message. Nothing here propagates an error back to the link.

use brokerdesk_core::{Payload, topic};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::link::InboundMessage;
use crate::storage::{Database, DatabaseError, NewMessage, NewUser};

/// Persists inbound messages for one broker.
#[derive(Clone)]
pub struct Ingestor {
    db: Database,
    broker_id: i64,
}

impl Ingestor {
    pub const fn new(db: Database, broker_id: i64) -> Self {
        Self { db, broker_id }
    }

    /// Drain `rx` until every sender is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<InboundMessage>) {
        info!(broker_id = self.broker_id, "Ingestion worker started");
        while let Some(message) = rx.recv().await {
            self.ingest(message).await;
        }
        info!(broker_id = self.broker_id, "Ingestion worker stopped");
    }

    /// Persist one inbound message. Returns the stored message id, or `None`
    /// if it could not be stored at all.
    pub async fn ingest(&self, inbound: InboundMessage) -> Option<i64> {
        let payload = Payload::decode(&inbound.payload);
        let topic_id = self.resolve_topic(&inbound.topic).await;
        let user_id = match payload.client_id() {
            Some(client_id) => self.resolve_publisher(client_id).await,
            None => {
                debug!(topic = %inbound.topic, "Payload is not an envelope, publisher unknown");
                None
            }
        };

        let record = NewMessage {
            broker_id: self.broker_id,
            user_id,
            topic_id,
            qos: inbound.qos,
            message: payload.body(),
        };
        match self.db.insert_message(&record).await {
            Ok(id) => {
                debug!(
                    id,
                    topic = %inbound.topic,
                    retained = inbound.retained,
                    "Message stored"
                );
                Some(id)
            }
            Err(e) => {
                error!(
                    error = %e,
                    broker_id = self.broker_id,
                    topic = %inbound.topic,
                    "Failed to store inbound message, dropping it"
                );
                None
            }
        }
    }

    /// Catalogue id of the topic a message arrived on.
    ///
    /// A topic we are subscribed to is normally catalogued already. A miss
    /// means a wildcard subscription delivered a concrete topic, or the
    /// ledger lost track of a subscription; either way the topic is
    /// catalogued now.
    async fn resolve_topic(&self, name: &str) -> Option<i64> {
        match self.db.find_topic(self.broker_id, name).await {
            Ok(Some(found)) => return Some(found.id),
            Ok(None) => self.report_catalogue_miss(name).await,
            Err(e) => {
                error!(error = %e, topic = %name, "Topic lookup failed");
                return None;
            }
        }

        match self.db.resolve_or_create_topic(self.broker_id, name).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, topic = %name, "Failed to catalogue inbound topic");
                None
            }
        }
    }

    async fn report_catalogue_miss(&self, name: &str) {
        match self.db.subscribed_filters(self.broker_id).await {
            Ok(filters) if filters.iter().any(|f| topic::matches(f, name)) => {
                debug!(topic = %name, "New topic under a wildcard subscription");
            }
            Ok(_) => {
                warn!(
                    broker_id = self.broker_id,
                    topic = %name,
                    "Received a message on a topic no recorded subscription covers"
                );
            }
            Err(e) => warn!(error = %e, topic = %name, "Could not check subscriptions"),
        }
    }

    /// User id of the publisher named in an envelope. Unknown publishers are
    /// recorded as outsiders.
    async fn resolve_publisher(&self, client_id: &str) -> Option<i64> {
        match self
            .db
            .find_user_by_client_and_broker(client_id, self.broker_id)
            .await
        {
            Ok(user) => return Some(user.id),
            Err(DatabaseError::NotFound(_)) => {}
            Err(e) => {
                error!(error = %e, client_id, "Publisher lookup failed");
                return None;
            }
        }

        match self
            .db
            .resolve_or_create_user(NewUser::outsider(self.broker_id, client_id))
            .await
        {
            Ok(id) => {
                info!(client_id, user_id = id, "Recorded outsider publisher");
                Some(id)
            }
            Err(e) => {
                error!(error = %e, client_id, "Failed to record outsider publisher");
                None
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "ingest_tests.rs"]
mod tests;
