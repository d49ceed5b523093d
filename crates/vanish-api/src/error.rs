use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use vanish_types::api::ErrorResponse;
use vanish_types::models::PolicyError;

/// Outcome of a lifecycle operation that did not succeed.
///
/// Missing, expired and (for readers) malformed ids all collapse into
/// `NotFound` so a link never reveals whether it used to exist.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("message not found")]
    NotFound,
    #[error("{0}")]
    Validation(String),
    #[error("upstream failure: {0:#}")]
    Upstream(#[from] anyhow::Error),
}

impl From<PolicyError> for LifecycleError {
    fn from(e: PolicyError) -> Self {
        LifecycleError::Validation(e.to_string())
    }
}

/// Errors as seen by HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("internal server error")]
    Internal,
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::NotFound => ApiError::NotFound,
            LifecycleError::Validation(msg) => ApiError::BadRequest(msg),
            LifecycleError::Upstream(e) => {
                error!("Upstream failure: {:#}", e);
                ApiError::Internal
            }
        }
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}
