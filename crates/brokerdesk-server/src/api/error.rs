//! API error type.
//!
//! Every failed request answers with the same JSON shape,
//! `{"code": "...", "message": "..."}`, and a status matching the code.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use super::types::ErrorBody;
use crate::link::LinkError;
use crate::session::SessionError;
use crate::storage::DatabaseError;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// 400: the request is malformed or refers to something it may not.
pub fn api_bad_request(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

/// 401: no broker session to act on.
pub fn api_unauthorized(message: impl Into<String>) -> ApiError {
    ApiError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
}

/// 500 from a storage failure. Details are logged, not returned.
pub fn api_internal(context: &str, err: &DatabaseError) -> ApiError {
    tracing::error!(error = %err, context, "storage error");
    ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", context)
}

/// Map a failed broker operation onto 502 (broker said no, or the link broke)
/// or 504 (no answer in time).
pub fn api_broker(err: &LinkError) -> ApiError {
    match err {
        LinkError::Timeout => {
            ApiError::new(StatusCode::GATEWAY_TIMEOUT, "broker_timeout", err.to_string())
        }
        _ => ApiError::new(StatusCode::BAD_GATEWAY, "broker_error", err.to_string()),
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        api_bad_request(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        api_bad_request(rejection.body_text())
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            // A connect that never completes is still "could not reach the
            // broker", not a gateway timeout on an operation.
            SessionError::Link(e) => {
                ApiError::new(StatusCode::BAD_GATEWAY, "broker_unavailable", e.to_string())
            }
            SessionError::Database(e) => api_internal("Failed to record the broker session", &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helpers_build_expected_codes() {
        let bad = api_bad_request("nope");
        assert_eq!(bad.status, StatusCode::BAD_REQUEST);
        assert_eq!(bad.body.code, "bad_request");

        let unauthorized = api_unauthorized("who");
        assert_eq!(unauthorized.status, StatusCode::UNAUTHORIZED);

        let internal = api_internal("db down", &DatabaseError::Connection("gone".into()));
        assert_eq!(internal.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.body.message, "db down");
    }

    #[test]
    fn broker_errors_map_to_gateway_statuses() {
        assert_eq!(api_broker(&LinkError::Timeout).status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            api_broker(&LinkError::Rejected("x".into())).status,
            StatusCode::BAD_GATEWAY
        );

        let connect = ApiError::from(SessionError::Link(LinkError::Timeout));
        assert_eq!(connect.status, StatusCode::BAD_GATEWAY);
    }
}
