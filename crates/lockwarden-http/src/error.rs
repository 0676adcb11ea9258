//! HTTP error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lockwarden_api::BUDGET_UNLOCK_ACTION;
use serde::Serialize;

/// Error body returned for every non-2xx response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_actions: Option<Vec<String>>,
}

/// Request-level failures. Workflow failures are never errors here: they
/// are reported inside a 200 `RunReport`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unsupported action '{0}'")]
    InvalidAction(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request timed out")]
    Timeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidPayload(_) | ApiError::InvalidQuery(_) | ApiError::InvalidAction(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Timeout => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidPayload(_) => "invalid_payload",
            ApiError::InvalidQuery(_) => "invalid_query",
            ApiError::InvalidAction(_) => "invalid_action",
            ApiError::NotFound(_) => "not_found",
            ApiError::Timeout => "timeout",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let valid_actions = matches!(self, ApiError::InvalidAction(_))
            .then(|| vec![BUDGET_UNLOCK_ACTION.to_string()]);
        let body = ErrorResponse {
            error: self.code().to_string(),
            message: self.to_string(),
            valid_actions,
        };
        (self.status(), Json(body)).into_response()
    }
}
