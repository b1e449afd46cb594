//! Merge engine: commits derived rows into a dataset's canonical table.

use chrono::NaiveDateTime;
use point_common::{
    index_name, quote_ident, BoundingBox, ColumnDescriptor, GEOM_COLUMN, IDENTITY_COLUMN,
    POINT_DATE_COLUMN, SRID,
};
use sqlx::PgPool;
use storage::{DatasetExtent, TableSchema};
use tracing::{debug, info, instrument};

use crate::derive::DerivationPlan;
use crate::error::{is_derivation_failure, EtlError, Result};

/// `CREATE TABLE` for a new canonical table plus its two indexes.
pub fn create_canonical_sql(plan: &DerivationPlan) -> Vec<String> {
    let table = quote_ident(&plan.canonical_table);

    let mut defs: Vec<String> = plan
        .columns
        .iter()
        .map(|c| canonical_column_def(c, &plan.business_key))
        .collect();
    // Identity first.
    defs.sort_by_key(|def| !def.starts_with(&quote_ident(IDENTITY_COLUMN)));
    defs.push(format!("{} TIMESTAMP NOT NULL", quote_ident(POINT_DATE_COLUMN)));
    defs.push(format!(
        "{} geometry(Point, {})",
        quote_ident(GEOM_COLUMN),
        SRID
    ));

    vec![
        format!("CREATE TABLE {} ({})", table, defs.join(", ")),
        format!(
            "CREATE INDEX {} ON {} ({})",
            quote_ident(&index_name(&plan.dataset_name, POINT_DATE_COLUMN)),
            table,
            quote_ident(POINT_DATE_COLUMN)
        ),
        format!(
            "CREATE INDEX {} ON {} USING GIST ({})",
            quote_ident(&index_name(&plan.dataset_name, GEOM_COLUMN)),
            table,
            quote_ident(GEOM_COLUMN)
        ),
    ]
}

fn canonical_column_def(column: &ColumnDescriptor, business_key: &str) -> String {
    if column.name == business_key {
        format!(
            "{} {} PRIMARY KEY",
            quote_ident(IDENTITY_COLUMN),
            column.column_type.sql_type()
        )
    } else {
        format!(
            "{} {}",
            quote_ident(&column.name),
            column.column_type.sql_type()
        )
    }
}

/// Insert-from-select of every new staging row.
pub fn insert_sql(plan: &DerivationPlan, existing: Option<&TableSchema>) -> String {
    let mut targets: Vec<String> = plan
        .carried_columns(existing)
        .into_iter()
        .map(|(_, target)| quote_ident(&target))
        .collect();
    targets.push(quote_ident(POINT_DATE_COLUMN));
    targets.push(quote_ident(GEOM_COLUMN));

    format!(
        "INSERT INTO {} ({}) {}",
        quote_ident(&plan.canonical_table),
        targets.join(", "),
        plan.select_new_rows_sql(existing)
    )
}

/// Null out geometries at exactly (0, 0).
pub fn null_sentinel_geom_sql(canonical: &str) -> String {
    let geom = quote_ident(GEOM_COLUMN);
    format!(
        "UPDATE {} SET {geom} = NULL WHERE ST_X({geom}) = 0 AND ST_Y({geom}) = 0",
        quote_ident(canonical)
    )
}

pub fn extent_sql(canonical: &str) -> String {
    format!(
        "SELECT MIN({pd}), MAX({pd}), \
         ST_XMin(ST_Extent({g})), ST_YMin(ST_Extent({g})), \
         ST_XMax(ST_Extent({g})), ST_YMax(ST_Extent({g})) \
         FROM {}",
        quote_ident(canonical),
        pd = quote_ident(POINT_DATE_COLUMN),
        g = quote_ident(GEOM_COLUMN)
    )
}

/// Create the canonical table and fill it, in one transaction.
///
/// Returns the number of rows inserted.
#[instrument(skip(pool, plan), fields(table = %plan.canonical_table))]
pub async fn create_new(pool: &PgPool, plan: &DerivationPlan) -> Result<u64> {
    let merge_error = |source: sqlx::Error| EtlError::Merge {
        table: plan.canonical_table.clone(),
        source,
    };

    let mut tx = pool.begin().await?;

    for statement in create_canonical_sql(plan) {
        sqlx::query(&statement)
            .execute(&mut *tx)
            .await
            .map_err(merge_error)?;
    }

    let inserted = sqlx::query(&insert_sql(plan, None))
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_insert_error(plan, e))?
        .rows_affected();

    sqlx::query(&null_sentinel_geom_sql(&plan.canonical_table))
        .execute(&mut *tx)
        .await
        .map_err(merge_error)?;

    tx.commit().await.map_err(merge_error)?;

    info!(rows = inserted, "Canonical table created");
    Ok(inserted)
}

/// Insert rows whose business keys are absent from `existing`, in one
/// transaction. Returns the number of rows inserted.
#[instrument(skip(pool, plan, existing), fields(table = %plan.canonical_table))]
pub async fn insert_into(
    pool: &PgPool,
    plan: &DerivationPlan,
    existing: &TableSchema,
) -> Result<u64> {
    let merge_error = |source: sqlx::Error| EtlError::Merge {
        table: plan.canonical_table.clone(),
        source,
    };

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(&insert_sql(plan, Some(existing)))
        .execute(&mut *tx)
        .await
        .map_err(|e| classify_insert_error(plan, e))?
        .rows_affected();

    if inserted > 0 {
        sqlx::query(&null_sentinel_geom_sql(&plan.canonical_table))
            .execute(&mut *tx)
            .await
            .map_err(merge_error)?;
    }

    tx.commit().await.map_err(merge_error)?;

    info!(rows = inserted, "New rows merged");
    Ok(inserted)
}

fn classify_insert_error(plan: &DerivationPlan, source: sqlx::Error) -> EtlError {
    if is_derivation_failure(&source) {
        EtlError::Derivation {
            dataset: plan.dataset_name.clone(),
            source,
        }
    } else {
        EtlError::Merge {
            table: plan.canonical_table.clone(),
            source,
        }
    }
}

type ExtentRow = (
    Option<NaiveDateTime>,
    Option<NaiveDateTime>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
    Option<f64>,
);

/// Observed-date range and envelope of non-null geometries of a table.
pub async fn compute_extent(pool: &PgPool, canonical: &str) -> Result<DatasetExtent> {
    let (obs_from, obs_to, min_x, min_y, max_x, max_y) =
        sqlx::query_as::<_, ExtentRow>(&extent_sql(canonical))
            .fetch_one(pool)
            .await?;

    let bbox = match (min_x, min_y, max_x, max_y) {
        (Some(a), Some(b), Some(c), Some(d)) => Some(BoundingBox::new(a, b, c, d)),
        _ => None,
    };

    debug!(table = %canonical, ?obs_from, ?obs_to, ?bbox, "Computed extent");
    Ok(DatasetExtent {
        obs_from,
        obs_to,
        bbox,
    })
}
