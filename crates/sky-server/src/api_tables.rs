//! Schema catalog handlers.
//!
//! Provides:
//! - `POST /tables`, `GET /tables`
//! - `GET /tables/{table}`, `DELETE /tables/{table}`
//! - `POST /tables/{table}/properties`, `GET /tables/{table}/properties`
//! - `GET /tables/{table}/properties/{name}`

use crate::{error::ApiError, run_blocking, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Extension, Path,
    },
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use sky_catalog::{Property, TableSchema};
use std::sync::Arc;

/// Request body for `POST /tables`.
#[derive(Debug, Deserialize)]
pub struct CreateTableRequest {
    pub name: String,
}

/// Request body for `POST /tables/{table}/properties`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddPropertyRequest {
    pub name: String,
    #[serde(default)]
    pub transient: bool,
    pub data_type: String,
}

/// Handler for `POST /tables`.
pub async fn create_table_handler(
    Extension(state): Extension<Arc<AppState>>,
    payload: Result<Json<CreateTableRequest>, JsonRejection>,
) -> Result<Json<TableSchema>, ApiError> {
    let Json(request) = payload?;
    let table = run_blocking(move || Ok(state.catalog.create_table(&request.name)?)).await?;
    Ok(Json(TableSchema::clone(&table)))
}

/// Handler for `GET /tables`.
pub async fn list_tables_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Json<Vec<TableSchema>> {
    Json(
        state
            .catalog
            .list_tables()
            .iter()
            .map(|t| t.as_ref().clone())
            .collect(),
    )
}

/// Handler for `GET /tables/{table}`.
pub async fn get_table_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<TableSchema>, ApiError> {
    let Path(table) = path?;
    let schema = state.catalog.get_table(&table)?;
    Ok(Json(TableSchema::clone(&schema)))
}

/// Handler for `DELETE /tables/{table}`.
///
/// Drops the schema and every event stored in the table.
pub async fn delete_table_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<StatusCode, ApiError> {
    let Path(table) = path?;
    run_blocking(move || {
        state.log.drop_table(&table)?;
        Ok(())
    })
    .await?;
    Ok(StatusCode::OK)
}

/// Handler for `POST /tables/{table}/properties`.
pub async fn add_property_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
    payload: Result<Json<AddPropertyRequest>, JsonRejection>,
) -> Result<Json<Property>, ApiError> {
    let Path(table) = path?;
    let Json(request) = payload?;
    let property = run_blocking(move || {
        Ok(state.catalog.add_property(
            &table,
            &request.name,
            &request.data_type,
            request.transient,
        )?)
    })
    .await?;
    Ok(Json(property))
}

/// Handler for `GET /tables/{table}/properties`.
pub async fn list_properties_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<Vec<Property>>, ApiError> {
    let Path(table) = path?;
    Ok(Json(state.catalog.list_properties(&table)?))
}

/// Handler for `GET /tables/{table}/properties/{name}`.
pub async fn get_property_handler(
    Extension(state): Extension<Arc<AppState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Result<Json<Property>, ApiError> {
    let Path((table, name)) = path?;
    Ok(Json(state.catalog.get_property(&table, &name)?))
}
