//! Error types for query compilation and execution.

use sky_catalog::CatalogError;
use sky_events::EventError;

/// Errors that can occur while compiling or executing a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The table does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The query references a property the table does not declare.
    #[error("{0}")]
    UnknownProperty(String),

    /// A filter literal disagrees with its property's data type.
    #[error("{0}")]
    TypeMismatch(String),

    /// The query specification is malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// The compiled query no longer matches the table's schema.
    #[error("{0}")]
    SchemaStale(String),

    /// Execution was abandoned before it completed.
    #[error("query cancelled")]
    Cancelled,

    /// The event log failed while opening streams.
    #[error("query event log error: {0}")]
    Events(EventError),

    /// The catalog failed for a reason other than a missing table.
    #[error("query catalog error: {0}")]
    Catalog(CatalogError),

    /// The scan pool could not be started.
    #[error("query thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

impl From<CatalogError> for QueryError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(message) => Self::NotFound(message),
            other => Self::Catalog(other),
        }
    }
}

impl From<EventError> for QueryError {
    fn from(e: EventError) -> Self {
        match e {
            EventError::NotFound(message) => Self::NotFound(message),
            EventError::InvalidArgument(message) => Self::InvalidArgument(message),
            other => Self::Events(other),
        }
    }
}
