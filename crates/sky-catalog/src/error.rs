//! Error types for the schema catalog.

/// Errors that can occur during catalog operations.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// A table or property with the same name already exists.
    #[error("{0}")]
    Conflict(String),

    /// The named table or property does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request is malformed (bad name, unsupported data type).
    #[error("{0}")]
    InvalidArgument(String),

    /// A database operation failed.
    #[error("catalog database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// No pooled connection could be obtained.
    #[error("catalog connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}
