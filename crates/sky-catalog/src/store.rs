//! Persistence for the table directory and property schemas.
//!
//! The in-memory [`Catalog`](crate::Catalog) is authoritative while the
//! process runs; these functions keep the `tables` and `properties` tables
//! in step with it and rebuild it at start-up.

use rusqlite::{params, Connection, Transaction};
use sky_types::DataType;

use crate::error::CatalogError;
use crate::schema::{Property, TableSchema};

/// Inserts a table row and returns its storage id.
pub(crate) fn insert_table(conn: &Connection, name: &str) -> Result<i64, CatalogError> {
    conn.execute("INSERT INTO tables (name) VALUES (?1)", params![name])?;
    Ok(conn.last_insert_rowid())
}

/// Deletes a table row. Properties and events cascade.
pub(crate) fn delete_table(conn: &Connection, table_id: i64) -> Result<(), CatalogError> {
    conn.execute("DELETE FROM tables WHERE id = ?1", params![table_id])?;
    Ok(())
}

/// Inserts a property and records the new schema version in one transaction.
pub(crate) fn insert_property(
    tx: &Transaction<'_>,
    table_id: i64,
    version: u64,
    property: &Property,
) -> Result<(), CatalogError> {
    tx.execute(
        "INSERT INTO properties (table_id, id, name, data_type, transient)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            table_id,
            property.id,
            property.name,
            property.data_type.as_str(),
            property.transient,
        ],
    )?;
    tx.execute(
        "UPDATE tables SET schema_version = ?2 WHERE id = ?1",
        params![table_id, version as i64],
    )?;
    Ok(())
}

/// Loads every table with its properties, ordered by table name.
pub(crate) fn load_tables(conn: &Connection) -> Result<Vec<TableSchema>, CatalogError> {
    let mut stmt =
        conn.prepare("SELECT id, name, schema_version FROM tables ORDER BY name ASC")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut tables = Vec::new();
    for row in rows {
        let (id, name, version) = row?;
        let mut schema = TableSchema::new(id, name);
        schema.version = version as u64;
        schema.properties = load_properties(conn, id)?;
        tables.push(schema);
    }
    Ok(tables)
}

fn load_properties(conn: &Connection, table_id: i64) -> Result<Vec<Property>, CatalogError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, data_type, transient FROM properties
         WHERE table_id = ?1 ORDER BY rowid ASC",
    )?;
    let rows = stmt.query_map(params![table_id], |row| {
        Ok((
            row.get::<_, i16>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, bool>(3)?,
        ))
    })?;

    let mut properties = Vec::new();
    for row in rows {
        let (id, name, data_type, transient) = row?;
        let data_type: DataType = data_type
            .parse()
            .map_err(|e| CatalogError::InvalidArgument(format!("stored property {name}: {e}")))?;
        properties.push(Property {
            id,
            name,
            transient,
            data_type,
        });
    }
    Ok(properties)
}
