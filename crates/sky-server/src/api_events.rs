//! Event log handlers.
//!
//! Provides:
//! - `PUT /tables/{table}/objects/{objectId}/events/{timestamp}` (merge-upsert)
//! - `GET /tables/{table}/objects/{objectId}/events?from=&to=`
//! - `GET`/`DELETE /tables/{table}/objects/{objectId}/events/{timestamp}`
//! - `GET /tables/{table}/objects`, `DELETE /tables/{table}/objects/{objectId}`

use crate::{error::ApiError, json_bytes, json_response, run_blocking, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Extension, Path, Query,
    },
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use sky_events::TimeRange;
use sky_types::Timestamp;
use std::sync::Arc;

/// Path parameters addressing one event.
#[derive(Debug, Deserialize)]
pub struct EventPath {
    pub table: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
    pub timestamp: Timestamp,
}

/// Path parameters addressing one object.
#[derive(Debug, Deserialize)]
pub struct ObjectPath {
    pub table: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
}

/// Query parameters for `GET .../events`.
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    /// Inclusive lower timestamp bound.
    pub from: Option<Timestamp>,
    /// Inclusive upper timestamp bound.
    pub to: Option<Timestamp>,
}

/// Handler for `PUT /tables/{table}/objects/{objectId}/events/{timestamp}`.
///
/// Merges the body into the event at that timestamp. Returns an empty `200`.
pub async fn put_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<EventPath>, PathRejection>,
    payload: Result<Json<serde_json::Map<String, serde_json::Value>>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(path) = path?;
    let Json(values) = payload?;
    run_blocking(move || {
        state
            .log
            .put_event(&path.table, &path.object_id, path.timestamp, &values)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::OK)
}

/// Handler for `GET /tables/{table}/objects/{objectId}/events`.
///
/// Returns a JSON array of events in ascending timestamp order.
pub async fn get_events_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<ObjectPath>, PathRejection>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Path(path) = path?;
    let Query(range) = query?;
    let body = run_blocking(move || {
        let (schema, cursor) = state.log.get_events(
            &path.table,
            &path.object_id,
            TimeRange::new(range.from, range.to),
        )?;
        let events: Vec<_> = cursor.collect();
        let named: Vec<_> = events.iter().map(|e| e.named(&schema)).collect();
        json_bytes(&named)
    })
    .await?;
    Ok(json_response(body))
}

/// Handler for `GET /tables/{table}/objects/{objectId}/events/{timestamp}`.
pub async fn get_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<EventPath>, PathRejection>,
) -> Result<Response, ApiError> {
    let Path(path) = path?;
    let (schema, event) = state
        .log
        .get_event(&path.table, &path.object_id, path.timestamp)?;
    Ok(json_response(json_bytes(&event.named(&schema))?))
}

/// Handler for `DELETE /tables/{table}/objects/{objectId}/events/{timestamp}`.
pub async fn delete_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<EventPath>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(path) = path?;
    run_blocking(move || {
        state
            .log
            .delete_event(&path.table, &path.object_id, path.timestamp)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::OK)
}

/// Handler for `GET /tables/{table}/objects`.
pub async fn list_objects_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<String>>, ApiError> {
    let Path(table) = path?;
    Ok(Json(state.log.list_objects(&table)?))
}

/// Handler for `DELETE /tables/{table}/objects/{objectId}`.
///
/// Removes every event of the object.
pub async fn delete_object_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<ObjectPath>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(path) = path?;
    run_blocking(move || {
        state.log.delete_object(&path.table, &path.object_id)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::OK)
}
