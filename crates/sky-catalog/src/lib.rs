//! Schema catalog for the Sky event database.
//!
//! The catalog owns the table directory and each table's ordered property
//! schema. It is the leaf dependency of the event log and the query
//! compiler: both resolve property names, ids and data types through the
//! [`TableSchema`] snapshots published here.
//!
//! # Versioning
//!
//! Every [`Catalog::add_property`] publishes a new snapshot with the table's
//! schema version incremented. Compiled queries are stamped with that version
//! and with the ids and types of the properties they read; a query is stale
//! only when one of those no longer matches the current snapshot.
//!
//! # Concurrency
//!
//! Schema changes serialize per table; readers take a cheap `Arc` snapshot
//! and never block writers to other tables.

mod catalog;
mod error;
mod schema;
mod store;

pub use catalog::Catalog;
pub use error::CatalogError;
pub use schema::{Property, TableSchema};
