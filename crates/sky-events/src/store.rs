//! Persistence for event rows.

use rusqlite::{params, Connection};
use sky_types::Timestamp;

use crate::codec;
use crate::error::EventError;
use crate::event::Event;

/// Inserts or replaces the stored row for one event.
pub(crate) fn upsert_event(
    conn: &Connection,
    table_id: i64,
    object_id: &str,
    event: &Event,
) -> Result<(), EventError> {
    let data = codec::encode(event)?;
    conn.execute(
        "INSERT INTO events (table_id, object_id, timestamp, data)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT (table_id, object_id, timestamp) DO UPDATE SET data = excluded.data",
        params![table_id, object_id, event.timestamp(), data],
    )?;
    Ok(())
}

pub(crate) fn delete_event(
    conn: &Connection,
    table_id: i64,
    object_id: &str,
    timestamp: Timestamp,
) -> Result<(), EventError> {
    conn.execute(
        "DELETE FROM events WHERE table_id = ?1 AND object_id = ?2 AND timestamp = ?3",
        params![table_id, object_id, timestamp],
    )?;
    Ok(())
}

pub(crate) fn delete_object(
    conn: &Connection,
    table_id: i64,
    object_id: &str,
) -> Result<usize, EventError> {
    let n = conn.execute(
        "DELETE FROM events WHERE table_id = ?1 AND object_id = ?2",
        params![table_id, object_id],
    )?;
    Ok(n)
}

/// A decoded event row.
pub(crate) struct StoredEvent {
    pub table_id: i64,
    pub object_id: String,
    pub event: Event,
}

/// Loads and decodes every stored event.
pub(crate) fn load_events(conn: &Connection) -> Result<Vec<StoredEvent>, EventError> {
    let mut stmt = conn.prepare(
        "SELECT table_id, object_id, timestamp, data FROM events
         ORDER BY table_id, object_id, timestamp",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
            row.get::<_, Vec<u8>>(3)?,
        ))
    })?;

    let mut events = Vec::new();
    for row in rows {
        let (table_id, object_id, timestamp, data) = row?;
        let (event, _) = codec::decode(&data)?;
        if event.timestamp() != timestamp {
            tracing::warn!(
                table_id,
                object_id = %object_id,
                row_timestamp = timestamp,
                encoded_timestamp = event.timestamp(),
                "stored event timestamp disagrees with its row key"
            );
        }
        events.push(StoredEvent {
            table_id,
            object_id,
            event,
        });
    }
    Ok(events)
}

/// Returns `true` when the error is a foreign-key violation, which is how a
/// write racing a table drop surfaces.
pub(crate) fn is_missing_table(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}
