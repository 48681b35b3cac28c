//! Subscribe/unsubscribe batches: the live broker and the subscription
//! ledger move in lockstep, one topic at a time.

use std::sync::Arc;

use brokerdesk_core::topic;
use tracing::{error, info, warn};

use super::{BatchReport, DEFAULT_SUBSCRIBE_QOS, LedgerView, TopicResult, TopicState, TopicStatus};
use crate::link::{BrokerLink, QoS};
use crate::storage::{Database, DatabaseError, Ledger, LedgerInsert};

const SUBSCRIBED: &str = "Subscribed to the topic";
const ALREADY_SUBSCRIBED: &str = "The topic is already subscribed";
const UNSUBSCRIBED: &str = "Unsubscribed successfully";
const NOT_SUBSCRIBED: &str = "The topic wasn't even subscribed";
const UNKNOWN_TOPIC: &str = "The topic does not exist";

#[derive(Debug, Clone, Copy)]
enum Direction {
    Subscribe,
    Unsubscribe,
}

/// Subscription reconciler for one (broker, user) pair.
pub struct Subscriptions {
    db: Database,
    link: Arc<dyn BrokerLink>,
    broker_id: i64,
    user_id: i64,
    qos: QoS,
}

impl Subscriptions {
    pub fn new(db: Database, link: Arc<dyn BrokerLink>, broker_id: i64, user_id: i64) -> Self {
        Self {
            db,
            link,
            broker_id,
            user_id,
            qos: DEFAULT_SUBSCRIBE_QOS,
        }
    }

    #[must_use]
    pub const fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Subscribe to each topic in order. Only loading the ledger can fail the
    /// whole batch; every other failure is reported per item.
    pub async fn subscribe(&self, topics: &[String]) -> Result<BatchReport, DatabaseError> {
        let mut view = self.load().await?;
        let mut report = BatchReport::new();
        for topic in topics {
            let result = self.subscribe_one(&mut view, topic).await;
            report.push(topic.as_str(), result);
        }
        Ok(report)
    }

    /// Unsubscribe from each topic in order.
    pub async fn unsubscribe(&self, topics: &[String]) -> Result<BatchReport, DatabaseError> {
        let mut view = self.load().await?;
        let mut report = BatchReport::new();
        for topic in topics {
            let result = self.unsubscribe_one(&mut view, topic).await;
            report.push(topic.as_str(), result);
        }
        Ok(report)
    }

    async fn load(&self) -> Result<LedgerView, DatabaseError> {
        LedgerView::load(&self.db, Ledger::Subscriptions, self.broker_id, self.user_id).await
    }

    async fn subscribe_one(&self, view: &mut LedgerView, topic: &str) -> TopicResult {
        if let Err(e) = topic::validate_filter(topic) {
            return TopicResult::new(TopicStatus::ClientError, e.to_string());
        }

        let known_id = match view.state(topic) {
            TopicState::Marked(_) => {
                return TopicResult::new(TopicStatus::What, ALREADY_SUBSCRIBED);
            }
            TopicState::Known(id) => Some(id),
            TopicState::Unknown => None,
        };

        if let Err(e) = self.link.subscribe(topic, self.qos).await {
            warn!(topic, error = %e, "Broker did not accept subscription");
            return TopicResult::new(TopicStatus::Error, e.to_string());
        }

        match self.record_subscription(topic, known_id).await {
            Ok((topic_id, inserted)) => {
                view.set(topic, topic_id, true);
                match inserted {
                    LedgerInsert::Inserted => {
                        info!(topic, user_id = self.user_id, "Subscribed");
                        TopicResult::new(TopicStatus::Fine, SUBSCRIBED)
                    }
                    LedgerInsert::AlreadyPresent => {
                        TopicResult::new(TopicStatus::What, ALREADY_SUBSCRIBED)
                    }
                }
            }
            Err(e) => self.compensate(topic, Direction::Subscribe, &e).await,
        }
    }

    async fn record_subscription(
        &self,
        topic: &str,
        known_id: Option<i64>,
    ) -> Result<(i64, LedgerInsert), DatabaseError> {
        let topic_id = match known_id {
            Some(id) => id,
            None => self.db.resolve_or_create_topic(self.broker_id, topic).await?,
        };
        let inserted = self
            .db
            .insert_ledger_entry(Ledger::Subscriptions, self.broker_id, self.user_id, topic_id)
            .await?;
        Ok((topic_id, inserted))
    }

    async fn unsubscribe_one(&self, view: &mut LedgerView, topic: &str) -> TopicResult {
        if let Err(e) = topic::validate_filter(topic) {
            return TopicResult::new(TopicStatus::ClientError, e.to_string());
        }

        let topic_id = match view.state(topic) {
            TopicState::Unknown => {
                return TopicResult::new(TopicStatus::ClientError, UNKNOWN_TOPIC);
            }
            TopicState::Known(_) => return TopicResult::new(TopicStatus::What, NOT_SUBSCRIBED),
            TopicState::Marked(id) => id,
        };

        if let Err(e) = self.link.unsubscribe(topic).await {
            warn!(topic, error = %e, "Broker did not accept unsubscription");
            return TopicResult::new(TopicStatus::Error, e.to_string());
        }

        match self
            .db
            .delete_ledger_entry(Ledger::Subscriptions, self.broker_id, self.user_id, topic_id)
            .await
        {
            Ok(deleted) => {
                view.set(topic, topic_id, false);
                if deleted {
                    info!(topic, user_id = self.user_id, "Unsubscribed");
                    TopicResult::new(TopicStatus::Fine, UNSUBSCRIBED)
                } else {
                    TopicResult::new(TopicStatus::What, NOT_SUBSCRIBED)
                }
            }
            Err(e) => self.compensate(topic, Direction::Unsubscribe, &e).await,
        }
    }

    /// The broker accepted a change the ledger could not record. Undo the
    /// broker side once, best effort.
    async fn compensate(
        &self,
        topic: &str,
        direction: Direction,
        cause: &DatabaseError,
    ) -> TopicResult {
        let undone = match direction {
            Direction::Subscribe => self.link.unsubscribe(topic).await,
            Direction::Unsubscribe => self.link.subscribe(topic, self.qos).await,
        };

        match undone {
            Ok(()) => {
                error!(
                    divergence = true,
                    topic,
                    broker_id = self.broker_id,
                    user_id = self.user_id,
                    ?direction,
                    error = %cause,
                    "Ledger write failed after the broker accepted; broker change reverted"
                );
                TopicResult::new(
                    TopicStatus::ServerError,
                    format!("{cause}; the broker change was reverted"),
                )
            }
            Err(e) => {
                error!(
                    divergence = true,
                    topic,
                    broker_id = self.broker_id,
                    user_id = self.user_id,
                    ?direction,
                    error = %cause,
                    revert_error = %e,
                    "Ledger write failed after the broker accepted and the revert failed; \
                     broker and ledger disagree until the next session restore"
                );
                TopicResult::new(
                    TopicStatus::ServerError,
                    format!("{cause}; the broker and the ledger now disagree"),
                )
            }
        }
    }
}
