//! Sky server library logic.
//!
//! Hosts the catalog, event log and query engine behind an axum router.
//! Handlers run storage and query work on the blocking thread pool.

pub mod api_events;
pub mod api_query;
pub mod api_tables;
pub mod config;
pub mod error;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use sky_catalog::Catalog;
use sky_db::DbPool;
use sky_events::EventLog;
use sky_query::{EngineSettings, QueryEngine};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::{ApiError, StartupError};

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Table and property definitions.
    pub catalog: Arc<Catalog>,
    /// Per-object event streams.
    pub log: Arc<EventLog>,
    /// Query compiler, cache and executor.
    pub engine: Arc<QueryEngine>,
}

impl AppState {
    /// Loads the catalog and event log from a migrated database and starts
    /// the query engine.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` if stored tables or events cannot be read, or
    /// if the query thread pool cannot be started.
    pub fn open(pool: DbPool, settings: EngineSettings) -> Result<Self, StartupError> {
        let catalog = Arc::new(Catalog::open(pool)?);
        let log = Arc::new(EventLog::open(Arc::clone(&catalog))?);
        let engine = Arc::new(QueryEngine::new(Arc::clone(&log), settings)?);
        Ok(Self {
            catalog,
            log,
            engine,
        })
    }
}

/// Runs blocking storage or query work off the async runtime.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await?
}

/// Renders a JSON body for values that borrow from a blocking task.
pub(crate) fn json_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, ApiError> {
    Ok(serde_json::to_vec(value)?)
}

/// Wraps pre-rendered JSON in a `200 OK` response.
pub(crate) fn json_response(body: Vec<u8>) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

/// Maximum request body size (2 MiB). Protects against OOM from oversized payloads.
const MAX_REQUEST_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Health check handler.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/tables",
            post(api_tables::create_table_handler).get(api_tables::list_tables_handler),
        )
        .route(
            "/tables/{table}",
            get(api_tables::get_table_handler).delete(api_tables::delete_table_handler),
        )
        .route(
            "/tables/{table}/properties",
            post(api_tables::add_property_handler).get(api_tables::list_properties_handler),
        )
        .route(
            "/tables/{table}/properties/{name}",
            get(api_tables::get_property_handler),
        )
        .route(
            "/tables/{table}/objects",
            get(api_events::list_objects_handler),
        )
        .route(
            "/tables/{table}/objects/{objectId}",
            axum::routing::delete(api_events::delete_object_handler),
        )
        .route(
            "/tables/{table}/objects/{objectId}/events",
            get(api_events::get_events_handler),
        )
        .route(
            "/tables/{table}/objects/{objectId}/events/{timestamp}",
            get(api_events::get_event_handler)
                .put(api_events::put_event_handler)
                .delete(api_events::delete_event_handler),
        )
        .route("/tables/{table}/query", post(api_query::query_handler))
        .route(
            "/tables/{table}/query/codegen",
            post(api_query::codegen_handler),
        )
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
