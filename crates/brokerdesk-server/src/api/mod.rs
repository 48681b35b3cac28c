//! HTTP API for the brokerdesk dashboard.
//!
//! Handlers share an [`AppState`] holding the database, the active broker
//! session and the connector used to open new sessions.

mod connection;
mod error;
mod favourites;
mod messages;
mod topics;
pub mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use brokerdesk_core::Config;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use error::ApiError;
use error::{api_bad_request, api_internal, api_unauthorized};

use crate::link::LinkConnector;
use crate::session::{Session, SessionSlot};
use crate::storage::{Database, DatabaseError};

const NOT_AUTHENTICATED: &str = "Authenticate yourself first!";

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub sessions: SessionSlot,
    pub connector: Arc<dyn LinkConnector>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, connector: Arc<dyn LinkConnector>, config: Config) -> Self {
        Self {
            db,
            sessions: SessionSlot::default(),
            connector,
            config: Arc::new(config),
        }
    }

    /// The active session, if it is scoped to `broker_id`.
    ///
    /// With `require_link` the broker connection must also be up (connected
    /// or reconnecting); ledger-only operations pass `false`.
    async fn session_for(&self, broker_id: i64, require_link: bool) -> Result<Arc<Session>, ApiError> {
        let session = self
            .sessions
            .current()
            .await
            .ok_or_else(|| api_unauthorized(NOT_AUTHENTICATED))?;
        if require_link && !session.link.is_connected() {
            return Err(api_unauthorized("The broker connection is down"));
        }
        if session.broker_id != broker_id {
            return Err(api_bad_request(format!(
                "brokerId {broker_id} is not the connected broker"
            )));
        }
        Ok(session)
    }

    /// The live session, which must belong to `user_id`. Anything that goes
    /// over the broker connection acts as the connected user.
    async fn session_of(&self, broker_id: i64, user_id: i64) -> Result<Arc<Session>, ApiError> {
        let session = self.session_for(broker_id, true).await?;
        if session.user_id != user_id {
            return Err(api_bad_request(format!(
                "userId {user_id} is not the connected user"
            )));
        }
        Ok(session)
    }

    /// Like [`Self::session_for`] without the link check, additionally
    /// checking that `user_id` names a user of that broker.
    async fn session_for_user(&self, broker_id: i64, user_id: i64) -> Result<Arc<Session>, ApiError> {
        let session = self.session_for(broker_id, false).await?;
        match self.db.get_user(user_id).await {
            Ok(user) if user.broker_id == broker_id => Ok(session),
            Ok(_) | Err(DatabaseError::NotFound(_)) => Err(api_bad_request(format!(
                "userId {user_id} is not a user of broker {broker_id}"
            ))),
            Err(e) => Err(api_internal("Failed to look up the user", &e)),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/credentials", post(connection::post_credentials))
        .route("/disconnect", post(connection::post_disconnect))
        .route("/ping", get(connection::get_ping))
        .route("/topic/subscribe", post(topics::post_subscribe))
        .route("/topic/unsubscribe", post(topics::post_unsubscribe))
        .route("/topic/subscribed", get(topics::get_subscribed))
        .route("/topic/all-known", get(topics::get_all_known))
        .route("/topic/favourites", get(favourites::get_favourites))
        .route("/topic/favourites/mark", post(favourites::post_mark))
        .route("/topic/favourites/unmark", post(favourites::post_unmark))
        .route("/topic/send-message", post(messages::post_send_message))
        .route("/topic/messages", get(messages::get_messages))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
#[path = "api_tests.rs"]
mod tests;
