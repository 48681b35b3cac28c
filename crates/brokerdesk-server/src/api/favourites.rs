//! Favourite marks. These never touch the broker link.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use tracing::instrument;

use super::AppState;
use super::error::{ApiError, api_internal};
use super::topics::{batch_response, non_empty};
use super::types::{BrokerUserQuery, LedgerListResponse, TopicsRequest};
use crate::reconcile::{BatchReport, Favourites};
use crate::storage::Ledger;

async fn favourites(state: &AppState, req: &TopicsRequest) -> Result<Favourites, ApiError> {
    non_empty(req)?;
    state.session_for_user(req.broker_id, req.user_id).await?;
    Ok(Favourites::new(state.db.clone(), req.broker_id, req.user_id))
}

/// POST /topic/favourites/mark
#[instrument(skip(state, body), fields(route = "POST /topic/favourites/mark"))]
pub async fn post_mark(
    State(state): State<AppState>,
    body: Result<Json<TopicsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchReport>), ApiError> {
    let Json(req) = body?;
    let report = favourites(&state, &req)
        .await?
        .mark(&req.topics)
        .await
        .map_err(|e| api_internal("Failed to read the favourites", &e))?;
    Ok(batch_response(report))
}

/// POST /topic/favourites/unmark
#[instrument(skip(state, body), fields(route = "POST /topic/favourites/unmark"))]
pub async fn post_unmark(
    State(state): State<AppState>,
    body: Result<Json<TopicsRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<BatchReport>), ApiError> {
    let Json(req) = body?;
    let report = favourites(&state, &req)
        .await?
        .unmark(&req.topics)
        .await
        .map_err(|e| api_internal("Failed to read the favourites", &e))?;
    Ok(batch_response(report))
}

/// GET /topic/favourites
#[instrument(skip(state, query), fields(route = "GET /topic/favourites"))]
pub async fn get_favourites(
    State(state): State<AppState>,
    query: Result<Query<BrokerUserQuery>, QueryRejection>,
) -> Result<Json<LedgerListResponse>, ApiError> {
    let Query(q) = query?;
    state.session_for_user(q.broker_id, q.user_id).await?;
    let topics = state
        .db
        .list_ledger(Ledger::Favourites, q.broker_id, q.user_id)
        .await
        .map_err(|e| api_internal("Failed to list favourites", &e))?;
    Ok(Json(LedgerListResponse { topics }))
}
