//! Favourite mark/unmark batches. Purely a ledger operation; the broker is
//! not involved.

use super::{BatchReport, LedgerView, TopicResult, TopicState, TopicStatus};
use crate::storage::{Database, DatabaseError, Ledger, LedgerInsert};

const MARKED: &str = "Added topic to the favourite list";
const ALREADY_MARKED: &str = "The topic is marked as favourite";
const UNMARKED: &str = "Unmarked topic from favourite list";
const NOT_MARKED: &str = "The topic isn't on the favourite list";
const UNKNOWN_TOPIC: &str = "topic not known";

/// Favourites reconciler for one (broker, user) pair.
pub struct Favourites {
    db: Database,
    broker_id: i64,
    user_id: i64,
}

impl Favourites {
    pub const fn new(db: Database, broker_id: i64, user_id: i64) -> Self {
        Self {
            db,
            broker_id,
            user_id,
        }
    }

    pub async fn mark(&self, topics: &[String]) -> Result<BatchReport, DatabaseError> {
        let mut view = self.load().await?;
        let mut report = BatchReport::new();
        for topic in topics {
            let result = match view.state(topic) {
                TopicState::Unknown => TopicResult::new(TopicStatus::ClientError, UNKNOWN_TOPIC),
                TopicState::Marked(_) => TopicResult::new(TopicStatus::What, ALREADY_MARKED),
                TopicState::Known(id) => self.mark_one(&mut view, topic, id).await,
            };
            report.push(topic.as_str(), result);
        }
        Ok(report)
    }

    pub async fn unmark(&self, topics: &[String]) -> Result<BatchReport, DatabaseError> {
        let mut view = self.load().await?;
        let mut report = BatchReport::new();
        for topic in topics {
            let result = match view.state(topic) {
                TopicState::Unknown | TopicState::Known(_) => {
                    TopicResult::new(TopicStatus::What, NOT_MARKED)
                }
                TopicState::Marked(id) => self.unmark_one(&mut view, topic, id).await,
            };
            report.push(topic.as_str(), result);
        }
        Ok(report)
    }

    async fn load(&self) -> Result<LedgerView, DatabaseError> {
        LedgerView::load(&self.db, Ledger::Favourites, self.broker_id, self.user_id).await
    }

    async fn mark_one(&self, view: &mut LedgerView, topic: &str, topic_id: i64) -> TopicResult {
        match self
            .db
            .insert_ledger_entry(Ledger::Favourites, self.broker_id, self.user_id, topic_id)
            .await
        {
            Ok(inserted) => {
                view.set(topic, topic_id, true);
                match inserted {
                    LedgerInsert::Inserted => TopicResult::new(TopicStatus::Fine, MARKED),
                    LedgerInsert::AlreadyPresent => {
                        TopicResult::new(TopicStatus::What, ALREADY_MARKED)
                    }
                }
            }
            Err(e) => TopicResult::new(TopicStatus::ServerError, e.to_string()),
        }
    }

    async fn unmark_one(&self, view: &mut LedgerView, topic: &str, topic_id: i64) -> TopicResult {
        match self
            .db
            .delete_ledger_entry(Ledger::Favourites, self.broker_id, self.user_id, topic_id)
            .await
        {
            Ok(deleted) => {
                view.set(topic, topic_id, false);
                if deleted {
                    TopicResult::new(TopicStatus::Fine, UNMARKED)
                } else {
                    TopicResult::new(TopicStatus::What, NOT_MARKED)
                }
            }
            Err(e) => TopicResult::new(TopicStatus::ServerError, e.to_string()),
        }
    }
}
