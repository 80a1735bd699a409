//! The event log: per-table directories of per-object streams.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use sky_catalog::{Catalog, TableSchema};
use sky_types::{PropertyId, Timestamp, Value, TIMESTAMP_FIELD};

use crate::error::EventError;
use crate::event::Event;
use crate::store;
use crate::stream::{EventCursor, ObjectStream, TimeRange};

/// The objects of one table, ordered by id.
#[derive(Default)]
struct TableLog {
    objects: RwLock<BTreeMap<String, Arc<ObjectStream>>>,
}

impl TableLog {
    fn get(&self, object_id: &str) -> Option<Arc<ObjectStream>> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(object_id)
            .cloned()
    }

    fn get_or_create(&self, object_id: &str) -> Arc<ObjectStream> {
        if let Some(stream) = self.get(object_id) {
            return stream;
        }
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            objects
                .entry(object_id.to_string())
                .or_insert_with(|| Arc::new(ObjectStream::new())),
        )
    }

    /// Returns `true` while `stream` is the one registered for `object_id`.
    fn holds(&self, object_id: &str, stream: &Arc<ObjectStream>) -> bool {
        self.get(object_id)
            .is_some_and(|current| Arc::ptr_eq(&current, stream))
    }

    /// Unregisters `stream` if it is still the one held for `object_id`.
    fn remove(&self, object_id: &str, stream: &Arc<ObjectStream>) {
        let mut objects = self.objects.write().unwrap_or_else(|e| e.into_inner());
        if objects
            .get(object_id)
            .is_some_and(|current| Arc::ptr_eq(current, stream))
        {
            objects.remove(object_id);
        }
    }
}

/// Stores timestamped events for every object of every table.
///
/// In-memory streams are authoritative for reads; every mutation is written
/// through to SQLite before it becomes visible.
pub struct EventLog {
    catalog: Arc<Catalog>,
    tables: RwLock<HashMap<i64, Arc<TableLog>>>,
}

impl EventLog {
    /// Opens the log, rebuilding every stream from storage.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Database`, `EventError::Pool` or
    /// `EventError::Codec` when stored events cannot be read.
    pub fn open(catalog: Arc<Catalog>) -> Result<Self, EventError> {
        let stored = {
            let conn = catalog.pool().get()?;
            store::load_events(&conn)?
        };

        let count = stored.len();
        let log = Self {
            catalog,
            tables: RwLock::new(HashMap::new()),
        };
        for row in stored {
            log.table_log(row.table_id)
                .get_or_create(&row.object_id)
                .publish(Arc::new(row.event));
        }

        tracing::info!(events = count, "loaded event log");
        Ok(log)
    }

    /// Returns the catalog this log validates against.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Merges `values` into the event at `timestamp`, creating it if absent.
    ///
    /// A JSON `null` unsets the property. Every key is validated before any
    /// state changes, so a rejected write leaves the stream untouched.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist, `UnknownProperty` for an
    /// undeclared key, `TypeMismatch` when a value disagrees with its
    /// property's data type, `InvalidArgument` for an empty object id.
    pub fn put_event(
        &self,
        table: &str,
        object_id: &str,
        timestamp: Timestamp,
        values: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Arc<Event>, EventError> {
        let schema = self.catalog.get_table(table)?;
        validate_object_id(object_id)?;
        let changes = resolve_changes(&schema, timestamp, values)?;
        let table_log = self.table_log(schema.id);

        // A concurrent `delete_object` may unregister the stream while this
        // writer waits for its lock; retry against the replacement.
        loop {
            let stream = table_log.get_or_create(object_id);
            let _writer = stream.lock_writer();
            if !table_log.holds(object_id, &stream) {
                continue;
            }

            let mut event = stream
                .get(timestamp)
                .map_or_else(|| Event::new(timestamp), |e| Event::clone(&e));
            event.apply(changes);

            let conn = self.catalog.pool().get()?;
            if let Err(e) = store::upsert_event(&conn, schema.id, object_id, &event) {
                return Err(match e {
                    EventError::Database(ref db) if store::is_missing_table(db) => {
                        self.forget_table(schema.id, &table_log);
                        EventError::NotFound(format!("table not found: {table}"))
                    }
                    other => {
                        if stream.is_empty() {
                            table_log.remove(object_id, &stream);
                        }
                        other
                    }
                });
            }

            let event = Arc::new(event);
            stream.publish(Arc::clone(&event));

            tracing::debug!(
                table,
                object_id,
                timestamp,
                values = event.len(),
                "put event"
            );
            return Ok(event);
        }
    }

    /// Opens a lazy cursor over an object's events within `range`.
    ///
    /// An object with no events yields an empty cursor.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist, `InvalidArgument` if the range
    /// is inverted.
    pub fn get_events(
        &self,
        table: &str,
        object_id: &str,
        range: TimeRange,
    ) -> Result<(Arc<TableSchema>, EventCursor), EventError> {
        let schema = self.catalog.get_table(table)?;
        if range.is_empty() {
            return Err(EventError::InvalidArgument(format!(
                "invalid range: from {:?} is after to {:?}",
                range.from, range.to
            )));
        }
        let stream = self
            .existing_table_log(schema.id)
            .and_then(|log| log.get(object_id))
            .unwrap_or_else(|| Arc::new(ObjectStream::new()));
        Ok((schema, stream.cursor(range)))
    }

    /// Returns the event at exactly `timestamp`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist or holds no such event.
    pub fn get_event(
        &self,
        table: &str,
        object_id: &str,
        timestamp: Timestamp,
    ) -> Result<(Arc<TableSchema>, Arc<Event>), EventError> {
        let schema = self.catalog.get_table(table)?;
        let event = self
            .existing_table_log(schema.id)
            .and_then(|log| log.get(object_id))
            .and_then(|stream| stream.get(timestamp))
            .ok_or_else(|| event_not_found(table, object_id, timestamp))?;
        Ok((schema, event))
    }

    /// Removes the event at `timestamp`.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist or holds no such event.
    pub fn delete_event(
        &self,
        table: &str,
        object_id: &str,
        timestamp: Timestamp,
    ) -> Result<(), EventError> {
        let schema = self.catalog.get_table(table)?;
        let table_log = self
            .existing_table_log(schema.id)
            .ok_or_else(|| event_not_found(table, object_id, timestamp))?;
        let stream = table_log
            .get(object_id)
            .ok_or_else(|| event_not_found(table, object_id, timestamp))?;

        let _writer = stream.lock_writer();
        if stream.get(timestamp).is_none() {
            return Err(event_not_found(table, object_id, timestamp));
        }
        let conn = self.catalog.pool().get()?;
        store::delete_event(&conn, schema.id, object_id, timestamp)?;
        stream.remove(timestamp);
        if stream.is_empty() {
            table_log.remove(object_id, &stream);
        }

        tracing::debug!(table, object_id, timestamp, "deleted event");
        Ok(())
    }

    /// Removes every event of an object and forgets the object. Returns how
    /// many events were removed.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    pub fn delete_object(&self, table: &str, object_id: &str) -> Result<usize, EventError> {
        let schema = self.catalog.get_table(table)?;
        let Some(table_log) = self.existing_table_log(schema.id) else {
            return Ok(0);
        };
        let Some(stream) = table_log.get(object_id) else {
            return Ok(0);
        };

        let _writer = stream.lock_writer();
        let conn = self.catalog.pool().get()?;
        store::delete_object(&conn, schema.id, object_id)?;
        let removed = stream.clear();
        table_log.remove(object_id, &stream);

        tracing::info!(table, object_id, removed, "deleted object");
        Ok(removed)
    }

    /// Returns the ids of every object holding at least one event, ascending.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    pub fn list_objects(&self, table: &str) -> Result<Vec<String>, EventError> {
        let schema = self.catalog.get_table(table)?;
        Ok(self
            .streams(schema.id, None)
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    /// Drops a table from the catalog along with every event it holds.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    pub fn drop_table(&self, table: &str) -> Result<Arc<TableSchema>, EventError> {
        let schema = self.catalog.delete_table(table)?;
        let dropped = self
            .tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&schema.id);
        let objects = dropped.map_or(0, |log| {
            log.objects.read().unwrap_or_else(|e| e.into_inner()).len()
        });
        tracing::info!(table, table_id = schema.id, objects, "dropped table events");
        Ok(schema)
    }

    /// Snapshots the non-empty streams of a table, ordered by object id.
    ///
    /// With `object_ids`, only the listed objects are returned; unknown ids
    /// are skipped.
    pub fn streams(
        &self,
        table_id: i64,
        object_ids: Option<&[String]>,
    ) -> Vec<(String, Arc<ObjectStream>)> {
        let Some(log) = self.existing_table_log(table_id) else {
            return Vec::new();
        };
        let objects = log.objects.read().unwrap_or_else(|e| e.into_inner());

        let mut streams: Vec<(String, Arc<ObjectStream>)> = match object_ids {
            Some(ids) => ids
                .iter()
                .filter_map(|id| objects.get(id).map(|s| (id.clone(), Arc::clone(s))))
                .collect(),
            None => objects
                .iter()
                .map(|(id, s)| (id.clone(), Arc::clone(s)))
                .collect(),
        };
        drop(objects);

        streams.retain(|(_, s)| !s.is_empty());
        streams.sort_by(|a, b| a.0.cmp(&b.0));
        streams.dedup_by(|a, b| a.0 == b.0);
        streams
    }

    /// Number of objects registered for a table, empty or not.
    #[cfg(test)]
    pub(crate) fn tracked_objects(&self, table_id: i64) -> Option<usize> {
        self.existing_table_log(table_id)
            .map(|log| log.objects.read().unwrap_or_else(|e| e.into_inner()).len())
    }

    /// Returns the objects of a table, or `None` before its first write.
    fn existing_table_log(&self, table_id: i64) -> Option<Arc<TableLog>> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table_id)
            .cloned()
    }

    fn table_log(&self, table_id: i64) -> Arc<TableLog> {
        if let Some(log) = self.existing_table_log(table_id) {
            return log;
        }
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(tables.entry(table_id).or_default())
    }

    /// Drops the entry for a table that vanished from storage mid-write.
    fn forget_table(&self, table_id: i64, log: &Arc<TableLog>) {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if tables
            .get(&table_id)
            .is_some_and(|current| Arc::ptr_eq(current, log))
        {
            tables.remove(&table_id);
        }
    }
}

fn validate_object_id(object_id: &str) -> Result<(), EventError> {
    if object_id.is_empty() {
        return Err(EventError::InvalidArgument(
            "object id must not be empty".into(),
        ));
    }
    Ok(())
}

fn event_not_found(table: &str, object_id: &str, timestamp: Timestamp) -> EventError {
    EventError::NotFound(format!(
        "event not found: {table}/{object_id}@{timestamp}"
    ))
}

/// Validates a JSON body against the schema and turns it into id-keyed
/// changes. `None` unsets the property.
fn resolve_changes(
    schema: &TableSchema,
    timestamp: Timestamp,
    values: &serde_json::Map<String, serde_json::Value>,
) -> Result<Vec<(PropertyId, Option<Value>)>, EventError> {
    let mut changes = Vec::with_capacity(values.len());
    for (name, json) in values {
        if name == TIMESTAMP_FIELD {
            if json.as_i64() != Some(timestamp) {
                return Err(EventError::InvalidArgument(format!(
                    "body timestamp {json} does not match {timestamp}"
                )));
            }
            continue;
        }

        let property = schema.property(name).ok_or_else(|| {
            EventError::UnknownProperty(format!("unknown property: {}.{name}", schema.name))
        })?;
        if json.is_null() {
            changes.push((property.id, None));
            continue;
        }
        let value = property.data_type.coerce(json).ok_or_else(|| {
            EventError::TypeMismatch(format!(
                "property {name} expects {}, got {json}",
                property.data_type
            ))
        })?;
        changes.push((property.id, Some(value)));
    }
    Ok(changes)
}
