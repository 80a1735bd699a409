//! The event record and its JSON rendering.

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};
use sky_catalog::TableSchema;
use sky_types::{PropertyId, Timestamp, Value, TIMESTAMP_FIELD};

/// A timestamped set of property values for one object.
///
/// Values are keyed by property id; names are resolved through the table
/// schema only when the event is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    timestamp: Timestamp,
    values: BTreeMap<PropertyId, Value>,
}

impl Event {
    /// Creates an event with no data.
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            values: BTreeMap::new(),
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Returns the value stored for a property.
    pub fn get(&self, id: PropertyId) -> Option<&Value> {
        self.values.get(&id)
    }

    /// Sets a property value, replacing any previous one.
    pub fn set(&mut self, id: PropertyId, value: Value) {
        self.values.insert(id, value);
    }

    /// Removes a property value. Returns the removed value, if any.
    pub fn unset(&mut self, id: PropertyId) -> Option<Value> {
        self.values.remove(&id)
    }

    /// Number of property values carried by the event.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over values in ascending property-id order.
    pub fn values(&self) -> impl Iterator<Item = (PropertyId, &Value)> {
        self.values.iter().map(|(id, v)| (*id, v))
    }

    /// Applies a batch of changes: `Some` sets a value, `None` unsets it.
    pub fn apply<I>(&mut self, changes: I)
    where
        I: IntoIterator<Item = (PropertyId, Option<Value>)>,
    {
        for (id, change) in changes {
            match change {
                Some(value) => self.set(id, value),
                None => {
                    self.unset(id);
                }
            }
        }
    }

    /// Renders the event with property names taken from `schema`.
    pub fn named<'a>(&'a self, schema: &'a TableSchema) -> NamedEvent<'a> {
        NamedEvent {
            event: self,
            schema,
        }
    }
}

/// JSON view of an event: `timestamp` first, then properties by name.
pub struct NamedEvent<'a> {
    event: &'a Event,
    schema: &'a TableSchema,
}

impl Serialize for NamedEvent<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut fields: Vec<(&str, &Value)> = self
            .event
            .values()
            .filter_map(|(id, value)| {
                self.schema
                    .property_by_id(id)
                    .map(|p| (p.name.as_str(), value))
            })
            .collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));

        let mut map = serializer.serialize_map(Some(fields.len() + 1))?;
        map.serialize_entry(TIMESTAMP_FIELD, &self.event.timestamp)?;
        for (name, value) in fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}
