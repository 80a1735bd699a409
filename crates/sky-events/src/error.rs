//! Error types for the event log.

use sky_catalog::CatalogError;

use crate::codec::CodecError;

/// Errors that can occur during event log operations.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// The table, or the addressed event, does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A value references a property the table does not declare.
    #[error("{0}")]
    UnknownProperty(String),

    /// A value disagrees with its property's declared data type.
    #[error("{0}")]
    TypeMismatch(String),

    /// The request is malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// A stored event could not be decoded.
    #[error("event codec error: {0}")]
    Codec(#[from] CodecError),

    /// A schema lookup failed for a reason other than a missing table.
    #[error("event catalog error: {0}")]
    Catalog(CatalogError),

    /// A database operation failed.
    #[error("event database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("event connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl From<CatalogError> for EventError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::NotFound(message) => Self::NotFound(message),
            CatalogError::Database(e) => Self::Database(e),
            CatalogError::Pool(e) => Self::Pool(e),
            other => Self::Catalog(other),
        }
    }
}
