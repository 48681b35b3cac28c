//! Subscription batches and topic listings.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use tracing::instrument;

use super::AppState;
use super::error::{ApiError, api_bad_request, api_internal};
use super::types::{
    BrokerQuery, BrokerUserQuery, LedgerListResponse, TopicListResponse, TopicsRequest,
};
use crate::link::qos_from_level;
use crate::reconcile::{BatchReport, DEFAULT_SUBSCRIBE_QOS, Subscriptions};
use crate::storage::Ledger;

/// 200 when every item was applied, 207 otherwise.
pub(super) fn batch_response(report: BatchReport) -> (StatusCode, Json<BatchReport>) {
    let status = if report.all_fine() {
        StatusCode::OK
    } else {
        StatusCode::MULTI_STATUS
    };
    (status, Json(report))
}

pub(super) fn non_empty(req: &TopicsRequest) -> Result<(), ApiError> {
    if req.topics.is_empty() {
        return Err(api_bad_request("topics must not be empty"));
    }
    Ok(())
}

async fn subscriptions(state: &AppState, req: &TopicsRequest) -> Result<Subscriptions, ApiError> {
    non_empty(req)?;
    let qos = match req.qos {
        None => DEFAULT_SUBSCRIBE_QOS,
        Some(level) => {
            qos_from_level(level).ok_or_else(|| api_bad_request("qos must be 0 or 1"))?
        }
    };
    let session = state.session_of(req.broker_id, req.user_id).await?;
    Ok(Subscriptions::new(
        state.db.clone(),
        session.link.clone(),
        req.broker_id,
        req.user_id,
    )
    .with_qos(qos))
}

/// POST /topic/subscribe
#[instrument(skip(state, body), fields(route = "POST /topic/subscribe"))]
pub async fn post_subscribe(
    State(state): State<AppState>,
    body: Result<Json<TopicsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchReport>), ApiError> {
    let Json(req) = body?;
    let report = subscriptions(&state, &req)
        .await?
        .subscribe(&req.topics)
        .await
        .map_err(|e| api_internal("Failed to read the subscription ledger", &e))?;
    Ok(batch_response(report))
}

/// POST /topic/unsubscribe
#[instrument(skip(state, body), fields(route = "POST /topic/unsubscribe"))]
pub async fn post_unsubscribe(
    State(state): State<AppState>,
    body: Result<Json<TopicsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchReport>), ApiError> {
    let Json(req) = body?;
    let report = subscriptions(&state, &req)
        .await?
        .unsubscribe(&req.topics)
        .await
        .map_err(|e| api_internal("Failed to read the subscription ledger", &e))?;
    Ok(batch_response(report))
}

/// GET /topic/subscribed
#[instrument(skip(state, query), fields(route = "GET /topic/subscribed"))]
pub async fn get_subscribed(
    State(state): State<AppState>,
    query: Result<Query<BrokerUserQuery>, QueryRejection>,
) -> Result<Json<LedgerListResponse>, ApiError> {
    let Query(q) = query?;
    state.session_for_user(q.broker_id, q.user_id).await?;
    let topics = state
        .db
        .list_ledger(Ledger::Subscriptions, q.broker_id, q.user_id)
        .await
        .map_err(|e| api_internal("Failed to list subscriptions", &e))?;
    Ok(Json(LedgerListResponse { topics }))
}

/// GET /topic/all-known
#[instrument(skip(state, query), fields(route = "GET /topic/all-known"))]
pub async fn get_all_known(
    State(state): State<AppState>,
    query: Result<Query<BrokerQuery>, QueryRejection>,
) -> Result<Json<TopicListResponse>, ApiError> {
    let Query(q) = query?;
    state.session_for(q.broker_id, false).await?;
    let topics = state
        .db
        .list_topics_for_broker(q.broker_id)
        .await
        .map_err(|e| api_internal("Failed to list topics", &e))?;
    Ok(Json(TopicListResponse { topics }))
}
