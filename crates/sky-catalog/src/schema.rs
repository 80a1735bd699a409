//! Table and property definitions.

use serde::Serialize;
use sky_types::{DataType, PropertyId};

/// A property declared on a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    /// Table-scoped id. Positive for permanent properties, negative for
    /// transient ones.
    pub id: PropertyId,
    /// Property name, unique within the table.
    pub name: String,
    /// Whether the value applies only to the event that carries it.
    pub transient: bool,
    /// Declared data type. Immutable once created.
    pub data_type: DataType,
}

/// An immutable snapshot of a table's schema.
///
/// Schema changes never mutate a snapshot; the catalog publishes a new one
/// with a higher [`version`](Self::version) instead, so readers holding an
/// `Arc<TableSchema>` keep a consistent view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableSchema {
    /// Storage id, unique for the life of the database.
    #[serde(skip)]
    pub id: i64,
    /// Table name.
    pub name: String,
    /// Incremented on every property addition.
    pub version: u64,
    /// Properties in declaration order.
    pub properties: Vec<Property>,
}

impl TableSchema {
    pub(crate) fn new(id: i64, name: String) -> Self {
        Self {
            id,
            name,
            version: 0,
            properties: Vec::new(),
        }
    }

    /// Looks up a property by name.
    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Looks up a property by id.
    pub fn property_by_id(&self, id: PropertyId) -> Option<&Property> {
        self.properties.iter().find(|p| p.id == id)
    }

    /// Returns the id the next property with the given transience receives,
    /// or `None` when the id space is exhausted.
    pub(crate) fn next_property_id(&self, transient: bool) -> Option<PropertyId> {
        if transient {
            let lowest = self.properties.iter().map(|p| p.id).filter(|id| *id < 0).min();
            lowest.unwrap_or(0).checked_sub(1)
        } else {
            let highest = self.properties.iter().map(|p| p.id).filter(|id| *id > 0).max();
            highest.unwrap_or(0).checked_add(1)
        }
    }
}
