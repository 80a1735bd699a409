//! SQLite connection pool shared by the catalog and the event log.

use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// A type alias for the SQLite connection pool.
pub type DbPool = Pool<SqliteConnectionManager>;

/// Errors that can occur when creating the database pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to build the pool or check out its first connection.
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),

    /// The first connection could not be inspected.
    #[error("failed to inspect database connection: {0}")]
    Inspect(#[from] rusqlite::Error),

    /// A connection came up without a setting the event log relies on.
    #[error("database {path}: PRAGMA {pragma} is {actual}")]
    Pragma {
        path: String,
        pragma: &'static str,
        actual: String,
    },
}

/// Creates the connection pool for a Sky database file.
///
/// Every connection runs in WAL mode with foreign keys on, which the table
/// drop cascade depends on. The first connection is checked out and
/// inspected before the pool is returned.
///
/// `:memory:` gives every pooled connection its own private database, so
/// in-memory pools should be created with `pool_max_size = 1`.
///
/// # Errors
///
/// Returns `PoolError` if the pool cannot be built or its connections do
/// not come up with the expected pragmas.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
    let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| configure(conn, busy_timeout));
    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    inspect(&*pool.get()?, db_path)?;
    tracing::debug!(
        path = db_path,
        pool_max_size = settings.pool_max_size,
        busy_timeout_ms = settings.busy_timeout_ms,
        "created database pool"
    );
    Ok(pool)
}

fn configure(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
    conn.busy_timeout(busy_timeout)
}

fn inspect(conn: &Connection, db_path: &str) -> Result<(), PoolError> {
    let mismatch = |pragma, actual: String| PoolError::Pragma {
        path: db_path.to_string(),
        pragma,
        actual,
    };

    let journal_mode: String = conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0))?;
    // In-memory databases cannot use WAL and report "memory".
    if journal_mode != "wal" && journal_mode != "memory" {
        return Err(mismatch("journal_mode", journal_mode));
    }

    let foreign_keys: i64 = conn.query_row("PRAGMA foreign_keys;", [], |row| row.get(0))?;
    if foreign_keys != 1 {
        return Err(mismatch("foreign_keys", foreign_keys.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_migrations;

    fn file_pool(dir: &tempfile::TempDir, settings: DbRuntimeSettings) -> DbPool {
        let path = dir.path().join("sky.db");
        create_pool(path.to_str().expect("utf-8 path"), settings)
            .expect("pool creation should succeed")
    }

    #[test]
    fn file_pool_uses_wal_and_settings() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let pool = file_pool(
            &dir,
            DbRuntimeSettings {
                busy_timeout_ms: 2_500,
                pool_max_size: 3,
            },
        );
        let conn = pool.get().expect("should get a connection");

        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .expect("should query journal_mode");
        assert_eq!(mode, "wal");
        let busy_timeout: i64 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .expect("should query busy_timeout");
        assert_eq!(busy_timeout, 2_500);
        assert_eq!(pool.max_size(), 3);
    }

    #[test]
    fn in_memory_pool_is_accepted() {
        let settings = DbRuntimeSettings {
            pool_max_size: 1,
            ..DbRuntimeSettings::default()
        };
        let pool = create_pool(":memory:", settings).expect("pool creation should succeed");
        let conn = pool.get().expect("should get a connection");
        assert!(run_migrations(&conn).is_ok());
    }

    #[test]
    fn every_pooled_connection_enforces_event_foreign_keys() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let pool = file_pool(&dir, DbRuntimeSettings::default());
        run_migrations(&pool.get().expect("should get a connection"))
            .expect("migrations should succeed");

        // Hold two connections so the second is a fresh one from the pool.
        let _first = pool.get().expect("should get a connection");
        let second = pool.get().expect("should get a second connection");
        let orphan = second.execute(
            "INSERT INTO events (table_id, object_id, timestamp, data) VALUES (99, 'o1', 1, x'00')",
            [],
        );
        assert!(orphan.is_err(), "event for a missing table must be rejected");
    }
}
