//! The schema catalog: table directory plus per-table property schemas.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sky_db::DbPool;
use sky_types::{validate_name, DataType, TIMESTAMP_FIELD};

use crate::error::CatalogError;
use crate::schema::{Property, TableSchema};
use crate::store;

/// A directory slot for one table.
///
/// The lock serializes schema changes for this table only. It holds `None`
/// once the table has been dropped so that writers racing a delete fail with
/// `NotFound` instead of resurrecting it.
struct TableEntry {
    schema: RwLock<Option<Arc<TableSchema>>>,
}

impl TableEntry {
    fn new(schema: Arc<TableSchema>) -> Self {
        Self {
            schema: RwLock::new(Some(schema)),
        }
    }

    fn snapshot(&self) -> Option<Arc<TableSchema>> {
        self.schema
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Owns table and property definitions.
///
/// Uses `std::sync::RwLock`: every critical section is a map operation or a
/// short SQLite write and none spans an `.await`.
pub struct Catalog {
    pool: DbPool,
    tables: RwLock<HashMap<String, Arc<TableEntry>>>,
}

impl Catalog {
    /// Opens the catalog, loading every persisted table.
    ///
    /// # Errors
    ///
    /// Returns `CatalogError::Database` or `CatalogError::Pool` when the
    /// stored schema cannot be read.
    pub fn open(pool: DbPool) -> Result<Self, CatalogError> {
        let loaded = {
            let conn = pool.get()?;
            store::load_tables(&conn)?
        };

        tracing::info!(tables = loaded.len(), "loaded table catalog");

        let tables = loaded
            .into_iter()
            .map(|schema| (schema.name.clone(), Arc::new(TableEntry::new(Arc::new(schema)))))
            .collect();

        Ok(Self {
            pool,
            tables: RwLock::new(tables),
        })
    }

    /// Returns the connection pool backing this catalog.
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// Creates an empty table.
    ///
    /// # Errors
    ///
    /// `Conflict` if the name is taken, `InvalidArgument` if the name is
    /// malformed.
    pub fn create_table(&self, name: &str) -> Result<Arc<TableSchema>, CatalogError> {
        validate_name(name).map_err(CatalogError::InvalidArgument)?;

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        if tables.contains_key(name) {
            return Err(CatalogError::Conflict(format!("table already exists: {name}")));
        }

        let conn = self.pool.get()?;
        let id = store::insert_table(&conn, name)?;
        let schema = Arc::new(TableSchema::new(id, name.to_string()));
        tables.insert(
            name.to_string(),
            Arc::new(TableEntry::new(Arc::clone(&schema))),
        );

        tracing::info!(table = name, table_id = id, "created table");
        Ok(schema)
    }

    /// Drops a table, its properties and every stored event.
    ///
    /// Returns the final schema snapshot so callers can release resources
    /// keyed by the table's storage id.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    pub fn delete_table(&self, name: &str) -> Result<Arc<TableSchema>, CatalogError> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let entry = tables
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("table not found: {name}")))?;

        let mut slot = entry.schema.write().unwrap_or_else(|e| e.into_inner());
        let schema = slot
            .clone()
            .ok_or_else(|| CatalogError::NotFound(format!("table not found: {name}")))?;

        let conn = self.pool.get()?;
        store::delete_table(&conn, schema.id)?;
        *slot = None;
        tables.remove(name);

        tracing::info!(table = name, table_id = schema.id, "deleted table");
        Ok(schema)
    }

    /// Appends a property to a table's schema and bumps its version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table is absent, `Conflict` if the property name is
    /// already declared, `InvalidArgument` for an unsupported data type, a
    /// malformed or reserved name, or an exhausted id space.
    pub fn add_property(
        &self,
        table: &str,
        name: &str,
        data_type: &str,
        transient: bool,
    ) -> Result<Property, CatalogError> {
        let entry = self.entry(table)?;
        let mut slot = entry.schema.write().unwrap_or_else(|e| e.into_inner());
        let current = slot
            .as_ref()
            .ok_or_else(|| CatalogError::NotFound(format!("table not found: {table}")))?;

        if current.property(name).is_some() {
            return Err(CatalogError::Conflict(format!(
                "property already exists: {table}.{name}"
            )));
        }
        validate_name(name).map_err(CatalogError::InvalidArgument)?;
        if name == TIMESTAMP_FIELD {
            return Err(CatalogError::InvalidArgument(format!(
                "property name is reserved: {name}"
            )));
        }
        let data_type: DataType =
            data_type.parse().map_err(|e: sky_types::ParseDataTypeError| {
                CatalogError::InvalidArgument(e.to_string())
            })?;
        let id = current.next_property_id(transient).ok_or_else(|| {
            CatalogError::InvalidArgument(format!("too many properties on table: {table}"))
        })?;

        let property = Property {
            id,
            name: name.to_string(),
            transient,
            data_type,
        };
        let mut next = TableSchema::clone(current);
        next.version += 1;
        next.properties.push(property.clone());

        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        store::insert_property(&tx, next.id, next.version, &property)?;
        tx.commit()?;

        tracing::info!(
            table,
            property = name,
            property_id = id,
            data_type = %data_type,
            transient,
            version = next.version,
            "added property"
        );

        *slot = Some(Arc::new(next));
        Ok(property)
    }

    /// Returns the current schema snapshot for a table.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    pub fn get_table(&self, name: &str) -> Result<Arc<TableSchema>, CatalogError> {
        self.entry(name)?
            .snapshot()
            .ok_or_else(|| CatalogError::NotFound(format!("table not found: {name}")))
    }

    /// Returns every table, ordered by name.
    pub fn list_tables(&self) -> Vec<Arc<TableSchema>> {
        let entries: Vec<Arc<TableEntry>> = self
            .tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let mut tables: Vec<Arc<TableSchema>> =
            entries.iter().filter_map(|e| e.snapshot()).collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        tables
    }

    /// Returns a table's properties in declaration order.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table does not exist.
    pub fn list_properties(&self, table: &str) -> Result<Vec<Property>, CatalogError> {
        Ok(self.get_table(table)?.properties.clone())
    }

    /// Returns a single property.
    ///
    /// # Errors
    ///
    /// `NotFound` if the table or the property does not exist.
    pub fn get_property(&self, table: &str, name: &str) -> Result<Property, CatalogError> {
        self.get_table(table)?
            .property(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("property not found: {table}.{name}")))
    }

    fn entry(&self, name: &str) -> Result<Arc<TableEntry>, CatalogError> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("table not found: {name}")))
    }
}
