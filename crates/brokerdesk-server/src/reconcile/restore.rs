//! Re-issue ledger subscriptions after the broker forgot them.

use tracing::{info, warn};

use super::DEFAULT_SUBSCRIBE_QOS;
use crate::link::BrokerLink;
use crate::storage::{Database, DatabaseError, Ledger};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestoreSummary {
    pub restored: usize,
    pub failed: usize,
}

/// Subscribe the live link to every topic the ledger holds for
/// (broker, user). The ledger itself is left untouched.
pub async fn restore_subscriptions(
    db: &Database,
    link: &dyn BrokerLink,
    broker_id: i64,
    user_id: i64,
) -> Result<RestoreSummary, DatabaseError> {
    let entries = db
        .list_ledger(Ledger::Subscriptions, broker_id, user_id)
        .await?;

    let mut summary = RestoreSummary::default();
    for entry in entries {
        match link.subscribe(&entry.topic, DEFAULT_SUBSCRIBE_QOS).await {
            Ok(()) => summary.restored += 1,
            Err(e) => {
                warn!(topic = %entry.topic, error = %e, "Failed to restore subscription");
                summary.failed += 1;
            }
        }
    }

    if summary.restored + summary.failed > 0 {
        info!(
            broker_id,
            user_id,
            restored = summary.restored,
            failed = summary.failed,
            "Restored subscriptions"
        );
    }
    Ok(summary)
}
