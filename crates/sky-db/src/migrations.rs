//! Embedded schema migrations for the table directory, property schemas
//! and event rows.
//!
//! Applied migrations are recorded by name in `_sky_migrations`. After the
//! pending ones run, the resulting schema is checked for the properties the
//! event log depends on: `events` is keyed by `(table_id, object_id,
//! timestamp)` without a rowid, and dropping a row from `tables` cascades to
//! its properties and events.

use std::collections::HashSet;

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Applied in order. New migrations are appended.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_tables",
        sql: include_str!("migrations/000_tables.sql"),
    },
    Migration {
        name: "001_properties",
        sql: include_str!("migrations/001_properties.sql"),
    },
    Migration {
        name: "002_events",
        sql: include_str!("migrations/002_events.sql"),
    },
];

/// Tables whose rows must disappear with their owning table.
const CASCADING_TABLES: [&str; 2] = ["events", "properties"];

/// Errors that can occur during migration execution.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A SQL statement within a migration failed.
    #[error("migration '{name}' failed: {source}")]
    ExecutionFailed {
        name: String,
        source: rusqlite::Error,
    },

    /// Failed to read migration state or the schema catalog.
    #[error("failed to check migration state: {0}")]
    StateQuery(rusqlite::Error),

    /// The migrated schema lacks something the event log relies on.
    #[error("storage schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Applies pending migrations and verifies the resulting schema.
///
/// Returns the number of migrations applied by this call.
///
/// # Errors
///
/// `ExecutionFailed` if a migration fails (its changes are rolled back),
/// `StateQuery` if the tracking table cannot be read, `SchemaMismatch` if
/// the database does not have the expected event storage layout.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _sky_migrations (
            name TEXT PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(MigrationError::StateQuery)?;

    let done = applied_names(conn)?;
    let mut applied = 0;
    for migration in MIGRATIONS.iter().filter(|m| !done.contains(m.name)) {
        apply(conn, migration)?;
        applied += 1;
    }

    verify_schema(conn)?;
    if applied > 0 {
        tracing::info!(applied, total = MIGRATIONS.len(), "migrated storage schema");
    }
    Ok(applied)
}

fn applied_names(conn: &Connection) -> Result<HashSet<String>, MigrationError> {
    let mut stmt = conn
        .prepare("SELECT name FROM _sky_migrations")
        .map_err(MigrationError::StateQuery)?;
    let names = stmt
        .query_map([], |row| row.get(0))
        .map_err(MigrationError::StateQuery)?
        .collect::<Result<HashSet<String>, _>>()
        .map_err(MigrationError::StateQuery)?;
    Ok(names)
}

fn apply(conn: &Connection, migration: &Migration) -> Result<(), MigrationError> {
    let failed = |source| MigrationError::ExecutionFailed {
        name: migration.name.to_string(),
        source,
    };

    tracing::info!(migration = migration.name, "applying migration");
    let tx = conn.unchecked_transaction().map_err(failed)?;
    tx.execute_batch(migration.sql).map_err(failed)?;
    tx.execute(
        "INSERT INTO _sky_migrations (name) VALUES (?1)",
        [migration.name],
    )
    .map_err(failed)?;
    tx.commit().map_err(failed)
}

fn verify_schema(conn: &Connection) -> Result<(), MigrationError> {
    let events_sql: Option<String> = conn
        .query_row(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'events'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(MigrationError::StateQuery)?;
    let events_sql = events_sql
        .ok_or_else(|| MigrationError::SchemaMismatch("events table is missing".into()))?;
    if !events_sql.to_ascii_uppercase().contains("WITHOUT ROWID") {
        return Err(MigrationError::SchemaMismatch(
            "events must be a WITHOUT ROWID table".into(),
        ));
    }

    for table in CASCADING_TABLES {
        let cascades: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM pragma_foreign_key_list(?1)
                 WHERE \"table\" = 'tables' AND on_delete = 'CASCADE'",
                [table],
                |row| row.get(0),
            )
            .map_err(MigrationError::StateQuery)?;
        if !cascades {
            return Err(MigrationError::SchemaMismatch(format!(
                "{table}.table_id must cascade when its table is deleted"
            )));
        }
    }
    Ok(())
}
