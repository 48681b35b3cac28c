//! Publishing and message history.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use brokerdesk_core::Envelope;
use brokerdesk_core::topic;
use tracing::{debug, error, instrument};

use super::AppState;
use super::error::{ApiError, api_bad_request, api_broker, api_internal};
use super::types::{MessageResponse, MessagesQuery, MessagesResponse, SendMessageRequest};
use crate::link::{QoS, qos_from_level};

/// POST /topic/send-message
///
/// The message goes out wrapped in an envelope carrying the session's client
/// id. It is stored when (and if) the broker delivers it back to us.
#[instrument(skip(state, body), fields(route = "POST /topic/send-message"))]
pub async fn post_send_message(
    State(state): State<AppState>,
    body: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(req) = body?;
    topic::validate_name(&req.topic).map_err(|e| api_bad_request(e.to_string()))?;
    let qos = match req.qos {
        None => QoS::AtMostOnce,
        Some(level) => {
            qos_from_level(level).ok_or_else(|| api_bad_request("qos must be 0 or 1"))?
        }
    };
    let session = state.session_of(req.broker_id, req.user_id).await?;

    let payload = Envelope::new(session.client_id.as_str(), req.message)
        .encode()
        .map_err(|e| {
            error!(error = %e, "Failed to encode envelope");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "Failed to encode the message")
        })?;

    session
        .link
        .publish(&req.topic, qos, req.retain, payload)
        .await
        .map_err(|e| api_broker(&e))?;

    debug!(topic = %req.topic, "Message published");
    Ok(Json(MessageResponse {
        message: "Message posted".to_string(),
    }))
}

/// GET /topic/messages
///
/// Newest first. An uncatalogued topic has no history and yields an empty
/// list.
#[instrument(skip(state, query), fields(route = "GET /topic/messages"))]
pub async fn get_messages(
    State(state): State<AppState>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let Query(q) = query?;
    let cap = state.config.server.history_limit;
    let limit = q.limit.unwrap_or(cap).min(cap);

    let topic = state
        .db
        .find_topic(q.broker_id, &q.topic)
        .await
        .map_err(|e| api_internal("Failed to look up the topic", &e))?;
    let messages = match topic {
        Some(t) => state
            .db
            .list_messages(q.broker_id, t.id, limit)
            .await
            .map_err(|e| api_internal("Failed to load message history", &e))?,
        None => Vec::new(),
    };
    Ok(Json(MessagesResponse {
        topic: q.topic,
        messages,
    }))
}
