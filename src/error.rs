use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;
use crate::time::TimeError;

/// Why a scheduling operation was refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulingError {
    #[error("{0}")]
    NotFound(String),
    /// Someone else got there first, or the target changed under the caller.
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    PastInstant(String),
    #[error("{0}")]
    Malformed(String),
    #[error("store failure: {0}")]
    Store(String),
}

impl From<TimeError> for SchedulingError {
    fn from(value: TimeError) -> Self {
        SchedulingError::Malformed(value.to_string())
    }
}

impl From<StoreError> for SchedulingError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(msg) => SchedulingError::NotFound(msg),
            StoreError::Conflict(msg) => SchedulingError::Conflict(msg),
            StoreError::Backend(msg) => SchedulingError::Store(msg),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PastInstant(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg).into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg).into_response(),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg).into_response(),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg).into_response(),
            ApiError::PastInstant(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg).into_response(),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

impl From<SchedulingError> for ApiError {
    fn from(value: SchedulingError) -> Self {
        match value {
            SchedulingError::NotFound(msg) => ApiError::NotFound(msg),
            SchedulingError::Conflict(msg) => ApiError::Conflict(msg),
            SchedulingError::Forbidden(msg) => ApiError::Forbidden(msg),
            SchedulingError::PastInstant(msg) => ApiError::PastInstant(msg),
            SchedulingError::Malformed(msg) => ApiError::BadRequest(msg),
            SchedulingError::Store(msg) => {
                error!("Store error: {msg}");
                ApiError::Internal("Storage unavailable".into())
            }
        }
    }
}

impl From<TimeError> for ApiError {
    fn from(value: TimeError) -> Self {
        ApiError::BadRequest(value.to_string())
    }
}
