//! Runtime schema discovery for canonical tables.

use sqlx::{FromRow, PgExecutor};
use tracing::debug;

use point_common::{
    ColumnDescriptor, ColumnType, GEOM_COLUMN, IDENTITY_COLUMN, POINT_DATE_COLUMN,
};

use crate::error::StorageResult;

/// Column layout of a table, resolved once per operation and passed along.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub table_name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableSchema {
    pub fn new(table_name: impl Into<String>, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            table_name: table_name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Staging layout implied by a canonical table: derived columns removed
    /// and the identity column renamed back to the business key.
    pub fn staging_columns(&self, business_key_column: &str) -> Vec<ColumnDescriptor> {
        self.columns
            .iter()
            .filter(|c| c.name != GEOM_COLUMN && c.name != POINT_DATE_COLUMN)
            .map(|c| {
                if c.name == IDENTITY_COLUMN {
                    ColumnDescriptor::new(business_key_column, c.column_type, c.nullable)
                } else {
                    c.clone()
                }
            })
            .collect()
    }
}

#[derive(FromRow)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    udt_name: String,
    is_nullable: String,
}

impl From<ColumnRow> for ColumnDescriptor {
    fn from(row: ColumnRow) -> Self {
        ColumnDescriptor::new(
            row.column_name,
            ColumnType::from_postgres(&row.data_type, &row.udt_name),
            row.is_nullable == "YES",
        )
    }
}

/// Read a table's columns from `information_schema`, in ordinal order.
///
/// Returns `None` when the table does not exist.
pub async fn discover_table_schema<'e, E>(
    executor: E,
    table_name: &str,
) -> StorageResult<Option<TableSchema>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, ColumnRow>(
        "SELECT column_name::TEXT AS column_name, data_type::TEXT AS data_type, \
         udt_name::TEXT AS udt_name, is_nullable::TEXT AS is_nullable \
         FROM information_schema.columns \
         WHERE table_schema = current_schema() AND table_name = $1 \
         ORDER BY ordinal_position",
    )
    .bind(table_name)
    .fetch_all(executor)
    .await?;

    if rows.is_empty() {
        debug!(table = %table_name, "Table does not exist");
        return Ok(None);
    }

    let columns = rows.into_iter().map(ColumnDescriptor::from).collect();
    Ok(Some(TableSchema::new(table_name, columns)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical() -> TableSchema {
        TableSchema::new(
            "dat_events",
            vec![
                ColumnDescriptor::new("point_id", ColumnType::String, false),
                ColumnDescriptor::new("lat", ColumnType::Float, true),
                ColumnDescriptor::new("lon", ColumnType::Float, true),
                ColumnDescriptor::new("date", ColumnType::Date, true),
                ColumnDescriptor::new("point_date", ColumnType::Timestamp, false),
                ColumnDescriptor::new("geom", ColumnType::Geometry, true),
            ],
        )
    }

    #[test]
    fn test_column_lookup() {
        let schema = canonical();
        assert!(schema.has_column("geom"));
        assert!(!schema.has_column("event_name"));
        assert_eq!(schema.column("lat").unwrap().column_type, ColumnType::Float);
    }

    #[test]
    fn test_staging_columns_from_canonical() {
        let staging = canonical().staging_columns("event_name");
        let names: Vec<_> = staging.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["event_name", "lat", "lon", "date"]);
        assert_eq!(staging[0].column_type, ColumnType::String);
        assert!(!staging[0].nullable);
    }
}
