//! The active broker session.
//!
//! One session exists at a time. It owns the live link, the identities the
//! credential flow resolved, and the background tasks that serve the link:
//! the ingestion worker and the restore task.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use brokerdesk_core::config::MqttConfig;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::ingest::Ingestor;
use crate::link::{BrokerLink, ConnectParams, LinkConnector, LinkError, LinkEvent};
use crate::reconcile::restore_subscriptions;
use crate::storage::{Database, DatabaseError, NewUser};

/// Capacity of the link lifecycle event queue.
const EVENT_QUEUE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Credentials submitted by the operator.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub ip: String,
    pub port: u16,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

pub struct Session {
    pub broker_id: i64,
    pub user_id: i64,
    pub ip: String,
    pub port: u16,
    pub client_id: String,
    pub link: Arc<dyn BrokerLink>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Session {
    /// Connect, resolve the broker and user rows, and start the session's
    /// background tasks.
    pub async fn establish(
        db: &Database,
        connector: &dyn LinkConnector,
        config: &MqttConfig,
        credentials: Credentials,
    ) -> Result<Arc<Self>, SessionError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_queue);
        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);

        let params = ConnectParams {
            host: credentials.ip.clone(),
            port: credentials.port,
            client_id: credentials.client_id.clone(),
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };
        let connected = connector.connect(params, inbound_tx, events_tx).await?;
        let link = connected.link;

        let (broker_id, user_id) = match resolve_identity(db, &credentials).await {
            Ok(ids) => ids,
            Err(e) => {
                link.disconnect(config.disconnect_grace()).await;
                return Err(e.into());
            }
        };

        if !connected.session_present {
            match restore_subscriptions(db, link.as_ref(), broker_id, user_id).await {
                Ok(summary) if summary.failed > 0 => {
                    warn!(failed = summary.failed, "Some subscriptions could not be restored");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "Failed to load subscriptions for restore"),
            }
        }

        let ingest = tokio::spawn(Ingestor::new(db.clone(), broker_id).run(inbound_rx));
        let restore = tokio::spawn(watch_session_loss(
            db.clone(),
            Arc::clone(&link),
            broker_id,
            user_id,
            events_rx,
        ));

        info!(
            broker_id,
            user_id,
            ip = %credentials.ip,
            port = credentials.port,
            client_id = %credentials.client_id,
            "Session established"
        );

        Ok(Arc::new(Self {
            broker_id,
            user_id,
            ip: credentials.ip,
            port: credentials.port,
            client_id: credentials.client_id,
            link,
            tasks: Mutex::new(vec![ingest, restore]),
        }))
    }

    /// Disconnect from the broker and stop the background tasks. The
    /// ingestion worker gets up to `grace` to drain what is already queued.
    pub async fn shutdown(&self, grace: Duration) {
        self.link.disconnect(grace).await;

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for mut task in tasks {
            if tokio::time::timeout(grace, &mut task).await.is_err() {
                task.abort();
            }
        }

        info!(broker_id = self.broker_id, user_id = self.user_id, "Session closed");
    }
}

async fn resolve_identity(
    db: &Database,
    credentials: &Credentials,
) -> Result<(i64, i64), DatabaseError> {
    let broker_id = db
        .resolve_or_create_broker(&credentials.ip, credentials.port)
        .await?;
    let user_id = db
        .resolve_or_create_user(NewUser {
            broker_id,
            client_id: &credentials.client_id,
            username: &credentials.username,
            password: &credentials.password,
            outsider: false,
        })
        .await?;
    Ok((broker_id, user_id))
}

/// Re-issue the ledger's subscriptions whenever the broker reports that it
/// did not resume our session.
async fn watch_session_loss(
    db: Database,
    link: Arc<dyn BrokerLink>,
    broker_id: i64,
    user_id: i64,
    mut events: mpsc::Receiver<LinkEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::SessionLost => {
                info!(broker_id, user_id, "Broker session lost, restoring subscriptions");
                if let Err(e) = restore_subscriptions(&db, link.as_ref(), broker_id, user_id).await
                {
                    error!(error = %e, "Failed to load subscriptions for restore");
                }
            }
        }
    }
}

/// Holder of the active session, shared by every request handler.
#[derive(Clone, Default)]
pub struct SessionSlot {
    inner: Arc<RwLock<Option<Arc<Session>>>>,
}

impl SessionSlot {
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.inner.read().await.clone()
    }

    /// Install `session`, returning the one it replaced.
    pub async fn install(&self, session: Arc<Session>) -> Option<Arc<Session>> {
        self.inner.write().await.replace(session)
    }

    pub async fn take(&self) -> Option<Arc<Session>> {
        self.inner.write().await.take()
    }

    /// Clear the slot only if it still holds `session`.
    pub async fn clear_if(&self, session: &Arc<Session>) -> bool {
        let mut slot = self.inner.write().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, session)) {
            *slot = None;
            true
        } else {
            false
        }
    }
}
