//! Compiles `field__operator=value` parameters into SQL conditions.
//!
//! Fields are checked against a discovered [`TableSchema`]: an operator key
//! naming a missing column rejects the request, while a bare key that is not
//! a column only produces a warning. Values are typed by their column and
//! always bound as parameters.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use point_common::column::parse_bool;
use point_common::time::{parse_date, parse_time};
use point_common::{
    extract_first_geometry_fragment, parse_datetime, quote_ident, ColumnType, WithinFilter, SRID,
};
use sqlx::{Postgres, QueryBuilder};
use storage::TableSchema;

use crate::errors::{QueryError, QueryResult};
use crate::operators::{split_key, Operator};
use crate::params::RawParams;

/// A filter value typed by its target column.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
}

impl TypedValue {
    /// Parse `raw` as a value of `column_type`.
    pub fn parse(column_type: ColumnType, raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let parsed = match column_type {
            ColumnType::Boolean => parse_bool(raw).map(TypedValue::Bool),
            ColumnType::Integer | ColumnType::BigInteger => raw.parse().ok().map(TypedValue::Int),
            ColumnType::Float => raw
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(TypedValue::Float),
            ColumnType::String => Some(TypedValue::Text(raw.to_string())),
            ColumnType::Date => parse_date(raw).map(TypedValue::Date),
            ColumnType::Time => parse_time(raw).map(TypedValue::Time),
            ColumnType::Timestamp => parse_datetime(raw).ok().map(TypedValue::Timestamp),
            ColumnType::Geometry => None,
        };
        parsed.ok_or_else(|| format!("'{}' is not a valid {} value", raw, column_type))
    }

    fn push_bind(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            TypedValue::Bool(v) => qb.push_bind(*v),
            TypedValue::Int(v) => qb.push_bind(*v),
            TypedValue::Float(v) => qb.push_bind(*v),
            TypedValue::Text(v) => qb.push_bind(v.clone()),
            TypedValue::Date(v) => qb.push_bind(*v),
            TypedValue::Time(v) => qb.push_bind(*v),
            TypedValue::Timestamp(v) => qb.push_bind(*v),
        };
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Scalar(TypedValue),
    List(Vec<TypedValue>),
    Area(WithinFilter),
}

/// One compiled boolean condition on a column.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub operator: Operator,
    pub value: FilterValue,
}

impl Condition {
    /// Append this condition to `qb`, binding its values.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        let column = quote_ident(&self.column);
        match &self.value {
            FilterValue::Area(filter) => push_within(qb, &column, filter),
            FilterValue::List(values) => {
                qb.push(format!("{} IN (", column));
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        qb.push(", ");
                    }
                    value.push_bind(qb);
                }
                qb.push(")");
            }
            FilterValue::Scalar(value) => {
                let symbol = self.operator.sql_symbol().unwrap_or("=");
                qb.push(format!("{} {} ", column, symbol));
                value.push_bind(qb);
            }
        }
    }
}

/// Append `ST_Within(column, area)` to `qb`.
///
/// Line filters are buffered by their degree distance first.
pub fn push_within(qb: &mut QueryBuilder<'_, Postgres>, column: &str, filter: &WithinFilter) {
    qb.push(format!("ST_Within({}, ", column));
    if filter.buffer_degrees().is_some() {
        qb.push("ST_Buffer(");
    }
    qb.push("ST_SetSRID(ST_GeomFromGeoJSON(");
    qb.push_bind(filter.fragment().to_geojson());
    qb.push(format!("), {})", SRID));
    if let Some(degrees) = filter.buffer_degrees() {
        qb.push(", ");
        qb.push_bind(degrees);
        qb.push(")");
    }
    qb.push(")");
}

/// Result of compiling the filter parameters of one request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledFilters {
    pub conditions: Vec<Condition>,
    /// Parameters that were neither named parameters nor columns.
    pub warnings: Vec<String>,
}

impl CompiledFilters {
    /// Append every condition, each preceded by `AND`.
    pub fn push_and(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        for condition in &self.conditions {
            qb.push(" AND ");
            condition.push_sql(qb);
        }
    }
}

/// Compile the non-named parameters of a request against `schema`.
///
/// `buffer_meters` sizes buffers around LineString `within` values.
pub fn compile_filters(
    params: &RawParams,
    schema: &TableSchema,
    buffer_meters: f64,
) -> QueryResult<CompiledFilters> {
    let mut compiled = CompiledFilters::default();

    for (key, raw) in params {
        let (field, operator) = match split_key(key) {
            (field, Some(tag)) => {
                if !schema.has_column(field) {
                    return Err(QueryError::validation(
                        field,
                        format!("'{}' is not a column of {}", field, schema.table_name),
                    ));
                }
                let operator = Operator::from_tag(tag).ok_or_else(|| {
                    QueryError::validation(key.as_str(), format!("'{}' is not a recognized operator", tag))
                })?;
                (field, operator)
            }
            (field, None) if schema.has_column(field) => (field, Operator::Eq),
            (field, None) => {
                compiled
                    .warnings
                    .push(format!("Unused parameter '{}'", field));
                continue;
            }
        };

        let column_type = schema
            .column(field)
            .map(|c| c.column_type)
            .unwrap_or(ColumnType::String);
        let value = typed_value(operator, column_type, raw, buffer_meters)
            .map_err(|reason| QueryError::validation(key.as_str(), reason))?;

        compiled.conditions.push(Condition {
            column: field.to_string(),
            operator,
            value,
        });
    }

    Ok(compiled)
}

fn typed_value(
    operator: Operator,
    column_type: ColumnType,
    raw: &str,
    buffer_meters: f64,
) -> Result<FilterValue, String> {
    match operator {
        Operator::Within => {
            if column_type != ColumnType::Geometry {
                return Err(format!("'within' does not apply to {} columns", column_type));
            }
            let fragment = extract_first_geometry_fragment(raw).map_err(|e| e.to_string())?;
            Ok(FilterValue::Area(WithinFilter::new(fragment, buffer_meters)))
        }
        _ if column_type == ColumnType::Geometry => {
            Err(format!("only 'within' applies to geometry columns, not '{}'", operator))
        }
        Operator::Like | Operator::ILike if column_type != ColumnType::String => {
            Err(format!("'{}' only applies to string columns", operator))
        }
        op if op.is_range() && !column_type.is_ordered() => {
            Err(format!("'{}' does not apply to {} columns", op, column_type))
        }
        Operator::In => {
            let values = raw
                .split(',')
                .map(|item| TypedValue::parse(column_type, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(FilterValue::List(values))
        }
        _ => TypedValue::parse(column_type, raw).map(FilterValue::Scalar),
    }
}
