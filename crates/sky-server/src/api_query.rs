//! Query handlers.
//!
//! Provides:
//! - `POST /tables/{table}/query`: compile (cached) and execute
//! - `POST /tables/{table}/query/codegen`: compile and return the plan

use crate::{error::ApiError, run_blocking, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path,
    },
    Json,
};
use sky_query::{CompiledQuery, QueryResult, QuerySpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Raises the cancellation flag when the request future is dropped.
///
/// axum drops the handler future when the client disconnects, which stops
/// the executor from starting work on further objects.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

/// Handler for `POST /tables/{table}/query`.
///
/// The body is a query specification, optionally with an `objectIds` array
/// restricting the objects scanned.
pub async fn query_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<QueryResult>, ApiError> {
    let Path(table) = path?;
    let Json(body) = payload?;

    let cancel = Arc::new(AtomicBool::new(false));
    let _guard = CancelOnDrop(Arc::clone(&cancel));
    let result = run_blocking(move || Ok(state.engine.run(&table, body, &cancel)?)).await?;
    Ok(Json(result))
}

/// Handler for `POST /tables/{table}/query/codegen`.
///
/// Returns the compiled artifact instead of query results.
pub async fn codegen_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<Json<CompiledQuery>, ApiError> {
    let Path(table) = path?;
    let Json(body) = payload?;

    let spec = QuerySpec::parse(body)?;
    let query = state.engine.compile(&table, &spec)?;
    Ok(Json(CompiledQuery::clone(&query)))
}
