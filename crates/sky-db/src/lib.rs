//! Storage layer for the Sky event database.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and embedded SQL migrations. The catalog and event log keep their working
//! sets in memory and write through to the tables created here, so the
//! database is only read in bulk at start-up.
//!
//! # Design decisions
//!
//! - **SQLite with WAL mode**: a single embedded file, no external database
//!   process. WAL mode lets start-up scans run alongside writers.
//! - **`r2d2` connection pool**: bounded connection reuse for the blocking
//!   tasks the server spawns per request.
//! - **Embedded migrations**: SQL files are compiled into the binary via
//!   `include_str!` and cannot drift from the code that depends on them.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};
