//! Row-level detail queries against a single dataset.

use point_common::{quote_ident, ColumnType, GEOM_COLUMN, POINT_DATE_COLUMN};
use serde::Serialize;
use sqlx::{Postgres, QueryBuilder};
use storage::TableSchema;

use crate::params::{NamedParams, QueryEcho};
use crate::predicate::{push_within, CompiledFilters};

#[derive(Debug, Clone, Serialize)]
pub struct DetailResponse {
    pub dataset_name: String,
    /// One JSON object per row; geometries are GeoJSON.
    pub rows: Vec<serde_json::Value>,
    pub offset: i64,
    pub limit: i64,
    pub query: QueryEcho,
    pub warnings: Vec<String>,
}

/// Paged rows of one canonical table as JSON objects.
///
/// The date window is inclusive at both ends.
pub fn detail_query(
    schema: &TableSchema,
    named: &NamedParams,
    filters: &CompiledFilters,
) -> QueryBuilder<'static, Postgres> {
    let select: Vec<String> = schema
        .columns
        .iter()
        .map(|c| {
            let column = quote_ident(&c.name);
            if c.column_type == ColumnType::Geometry {
                format!("ST_AsGeoJSON({col})::json AS {col}", col = column)
            } else {
                column
            }
        })
        .collect();

    let point_date = quote_ident(POINT_DATE_COLUMN);
    let mut qb = QueryBuilder::new(format!(
        "SELECT row_to_json(r) FROM (SELECT {} FROM {} WHERE {pd} >= ",
        select.join(", "),
        quote_ident(&schema.table_name),
        pd = point_date
    ));
    qb.push_bind(named.start);
    qb.push(format!(" AND {} <= ", point_date));
    qb.push_bind(named.end);

    if let Some(filter) = &named.within {
        qb.push(" AND ");
        push_within(&mut qb, &quote_ident(GEOM_COLUMN), filter);
    }
    filters.push_and(&mut qb);

    qb.push(format!(" ORDER BY {} LIMIT ", point_date));
    qb.push_bind(named.limit);
    qb.push(" OFFSET ");
    qb.push_bind(named.offset);
    qb.push(") r");
    qb
}
