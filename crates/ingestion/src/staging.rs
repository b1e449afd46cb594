//! Staging loader: bulk-copies a CSV source into a fresh staging table.
//!
//! The table is dropped and recreated on every attempt, gets a `line_num`
//! serial primary key numbering rows 1..N in file order, and is filled with
//! one `COPY ... FROM STDIN`. Creation and copy share a transaction, so a
//! failed load leaves no staging table behind.

use std::path::Path;

use point_common::{quote_ident, ColumnDescriptor, LINE_NUMBER_COLUMN};
use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};

use crate::error::{EtlError, Result};

pub fn drop_staging_sql(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", quote_ident(table))
}

pub fn create_staging_sql(table: &str, columns: &[ColumnDescriptor]) -> String {
    let mut defs: Vec<String> = columns
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql_type()))
        .collect();
    defs.push(format!("{} SERIAL PRIMARY KEY", quote_ident(LINE_NUMBER_COLUMN)));
    format!("CREATE TABLE {} ({})", quote_ident(table), defs.join(", "))
}

pub fn copy_sql(table: &str, columns: &[ColumnDescriptor]) -> String {
    let names: Vec<String> = columns.iter().map(|c| quote_ident(&c.name)).collect();
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT CSV, HEADER TRUE, DELIMITER ',')",
        quote_ident(table),
        names.join(", ")
    )
}

/// Create `table` with `columns` and bulk-load `source` into it.
///
/// Returns the number of rows copied.
#[instrument(skip(pool, columns, source), fields(columns = columns.len()))]
pub async fn load_staging(
    pool: &PgPool,
    table: &str,
    columns: &[ColumnDescriptor],
    source: &Path,
) -> Result<u64> {
    let load_error = |source: sqlx::Error| EtlError::Load {
        table: table.to_string(),
        source,
    };

    let mut tx = pool.begin().await?;

    sqlx::query(&drop_staging_sql(table))
        .execute(&mut *tx)
        .await
        .map_err(load_error)?;
    sqlx::query(&create_staging_sql(table, columns))
        .execute(&mut *tx)
        .await
        .map_err(load_error)?;

    let file = tokio::fs::File::open(source).await?;
    let mut copy = tx.copy_in_raw(&copy_sql(table, columns)).await.map_err(load_error)?;
    let copied = copy.read_from(file).await.map(|_| ());
    if let Err(e) = copied {
        if let Err(abort) = copy.abort(e.to_string()).await {
            debug!(error = %abort, "Aborting COPY");
        }
        return Err(load_error(e));
    }
    let rows = copy.finish().await.map_err(load_error)?;

    tx.commit().await.map_err(load_error)?;

    info!(table = %table, rows, "Staging table loaded");
    Ok(rows)
}

/// Drop a staging table, logging rather than failing.
pub async fn discard_staging(pool: &PgPool, table: &str) {
    match sqlx::query(&drop_staging_sql(table)).execute(pool).await {
        Ok(_) => debug!(table = %table, "Staging table discarded"),
        Err(e) => warn!(table = %table, error = %e, "Failed to drop staging table"),
    }
}
