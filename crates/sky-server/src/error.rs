//! HTTP error mapping.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sky_catalog::CatalogError;
use sky_events::EventError;
use sky_query::QueryError;
use thiserror::Error;

/// Errors raised while loading server state at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to load tables: {0}")]
    Catalog(#[from] CatalogError),
    #[error("failed to load events: {0}")]
    Events(#[from] EventError),
    #[error("failed to start query engine: {0}")]
    Query(#[from] QueryError),
}

/// API error type mapping to HTTP status codes.
///
/// Every variant renders as `{"message": string}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::Conflict(msg) => Self::Conflict(msg),
            CatalogError::NotFound(msg) => Self::NotFound(msg),
            CatalogError::InvalidArgument(msg) => Self::BadRequest(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EventError> for ApiError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::NotFound(msg) => Self::NotFound(msg),
            EventError::UnknownProperty(msg)
            | EventError::TypeMismatch(msg)
            | EventError::InvalidArgument(msg) => Self::BadRequest(msg),
            EventError::Catalog(e) => e.into(),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::NotFound(msg) => Self::NotFound(msg),
            QueryError::UnknownProperty(msg)
            | QueryError::TypeMismatch(msg)
            | QueryError::InvalidArgument(msg) => Self::BadRequest(msg),
            QueryError::SchemaStale(msg) => Self::Conflict(msg),
            QueryError::Events(e) => e.into(),
            QueryError::Catalog(e) => e.into(),
            QueryError::Cancelled => Self::Internal("query cancelled".into()),
            QueryError::ThreadPool(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(e: PathRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("task join error: {e}"))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("failed to encode response: {e}"))
    }
}
