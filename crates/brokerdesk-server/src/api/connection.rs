//! Broker session lifecycle: credentials, disconnect and liveness.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use tracing::{info, instrument, warn};

use super::error::{ApiError, api_bad_request, api_unauthorized};
use super::types::{CredentialsRequest, CredentialsResponse, MessageResponse, PingResponse};
use super::{AppState, NOT_AUTHENTICATED};
use crate::link::LinkState;
use crate::session::{Credentials, Session};

fn validate(req: CredentialsRequest) -> Result<Credentials, ApiError> {
    let ip = req.ip.trim();
    if ip.is_empty() {
        return Err(api_bad_request("ip must not be empty"));
    }
    let port = req
        .port
        .to_port()
        .ok_or_else(|| api_bad_request("port must be a number between 0 and 65535"))?;
    if req.client_id.trim().is_empty() {
        return Err(api_bad_request("clientId must not be empty"));
    }
    Ok(Credentials {
        ip: ip.to_string(),
        port,
        client_id: req.client_id,
        username: req.username,
        password: req.password,
    })
}

/// POST /credentials
#[instrument(skip(state, body), fields(route = "POST /credentials"))]
pub async fn post_credentials(
    State(state): State<AppState>,
    body: Result<Json<CredentialsRequest>, JsonRejection>,
) -> Result<Json<CredentialsResponse>, ApiError> {
    let Json(req) = body?;
    let credentials = validate(req)?;
    let grace = state.config.mqtt.disconnect_grace();

    if let Some(previous) = state.sessions.take().await {
        info!(broker_id = previous.broker_id, "Replacing the active session");
        previous.shutdown(grace).await;
    }

    let session = Session::establish(
        &state.db,
        state.connector.as_ref(),
        &state.config.mqtt,
        credentials,
    )
    .await?;

    let response = CredentialsResponse {
        message: "Connected to the MQTT broker".to_string(),
        broker_id: session.broker_id,
        user_id: session.user_id,
    };
    // Two credential requests can race past `take`; the later install wins.
    if let Some(raced) = state.sessions.install(session).await {
        warn!(broker_id = raced.broker_id, "Dropping a concurrently installed session");
        raced.shutdown(grace).await;
    }
    Ok(Json(response))
}

/// POST /disconnect
#[instrument(skip(state), fields(route = "POST /disconnect"))]
pub async fn post_disconnect(
    State(state): State<AppState>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Some(session) = state.sessions.take().await else {
        return Err(api_bad_request(
            "The server isn't even connected to any MQTT-Brokers",
        ));
    };
    session.shutdown(state.config.mqtt.disconnect_grace()).await;
    Ok(Json(MessageResponse {
        message: "The MQTT-Client disconnected from the broker.".to_string(),
    }))
}

/// GET /ping
///
/// A session whose link has given up is cleared here, and the coordinates
/// it used are returned so the dashboard can offer to reconnect.
#[instrument(skip(state), fields(route = "GET /ping"))]
pub async fn get_ping(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<PingResponse>), ApiError> {
    let session = state
        .sessions
        .current()
        .await
        .ok_or_else(|| api_unauthorized(NOT_AUTHENTICATED))?;

    match session.link.state() {
        LinkState::Connected => Ok((StatusCode::OK, Json(PingResponse::status("ok")))),
        LinkState::Reconnecting => Ok((StatusCode::OK, Json(PingResponse::status("reconnecting")))),
        LinkState::Disconnected(reason) => {
            if state.sessions.clear_if(&session).await {
                session.shutdown(state.config.mqtt.disconnect_grace()).await;
            }
            warn!(broker_id = session.broker_id, %reason, "Broker link is down");
            Ok((
                StatusCode::SERVICE_UNAVAILABLE,
                Json(PingResponse {
                    status: "disconnected".to_string(),
                    ip: Some(session.ip.clone()),
                    port: Some(session.port),
                    client_id: Some(session.client_id.clone()),
                    reason: Some(reason),
                }),
            ))
        }
    }
}
