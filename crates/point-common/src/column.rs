//! Column descriptors for runtime-discovered dataset schemas.
//!
//! Dataset tables have columns that are only known once a source file has
//! been read (or an existing table introspected), so columns are carried
//! around as plain data: a name, a semantic type tag and a nullability flag.

use serde::{Deserialize, Serialize};

use crate::time::{parse_date, parse_time, parse_timestamp};

/// Semantic column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInteger,
    Float,
    String,
    Date,
    Time,
    Timestamp,
    /// PostGIS geometry. Only produced by introspecting canonical tables.
    Geometry,
}

impl ColumnType {
    /// Coercion order tried by column inference. The first type accepting
    /// every non-empty value of a column wins; `String` accepts anything.
    pub const INFERENCE_ORDER: [ColumnType; 8] = [
        ColumnType::Boolean,
        ColumnType::Integer,
        ColumnType::BigInteger,
        ColumnType::Float,
        ColumnType::Date,
        ColumnType::Time,
        ColumnType::Timestamp,
        ColumnType::String,
    ];

    /// Postgres type used when creating staging and canonical tables.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInteger => "BIGINT",
            ColumnType::Float => "DOUBLE PRECISION",
            ColumnType::String => "VARCHAR",
            ColumnType::Date => "DATE",
            ColumnType::Time => "TIME",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Geometry => "geometry(Point, 4326)",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::BigInteger => "big_integer",
            ColumnType::Float => "float",
            ColumnType::String => "string",
            ColumnType::Date => "date",
            ColumnType::Time => "time",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Geometry => "geometry",
        }
    }

    /// Map a contributor-supplied type hint to a column type.
    ///
    /// `datetime` is accepted as an alias of `timestamp`.
    pub fn from_hint(hint: &str) -> Option<ColumnType> {
        match hint.trim().to_lowercase().as_str() {
            "boolean" => Some(ColumnType::Boolean),
            "integer" => Some(ColumnType::Integer),
            "big_integer" => Some(ColumnType::BigInteger),
            "float" => Some(ColumnType::Float),
            "string" => Some(ColumnType::String),
            "date" => Some(ColumnType::Date),
            "time" => Some(ColumnType::Time),
            "timestamp" | "datetime" => Some(ColumnType::Timestamp),
            _ => None,
        }
    }

    /// Map an `information_schema.columns` (`data_type`, `udt_name`) pair.
    ///
    /// Unknown types fall back to `String`; values of those columns are still
    /// comparable as text.
    pub fn from_postgres(data_type: &str, udt_name: &str) -> ColumnType {
        match data_type {
            "boolean" => ColumnType::Boolean,
            "smallint" | "integer" => ColumnType::Integer,
            "bigint" => ColumnType::BigInteger,
            "real" | "double precision" | "numeric" => ColumnType::Float,
            "date" => ColumnType::Date,
            "time without time zone" | "time with time zone" => ColumnType::Time,
            "timestamp without time zone" | "timestamp with time zone" => ColumnType::Timestamp,
            "USER-DEFINED" if udt_name == "geometry" => ColumnType::Geometry,
            _ => ColumnType::String,
        }
    }

    /// Whether `value` (already trimmed, non-empty) coerces to this type.
    pub fn accepts(&self, value: &str) -> bool {
        match self {
            ColumnType::Boolean => parse_bool(value).is_some(),
            ColumnType::Integer => value.parse::<i32>().is_ok(),
            ColumnType::BigInteger => value.parse::<i64>().is_ok(),
            ColumnType::Float => value.parse::<f64>().map(f64::is_finite).unwrap_or(false),
            ColumnType::Date => parse_date(value).is_some(),
            ColumnType::Time => parse_time(value).is_some(),
            ColumnType::Timestamp => parse_timestamp(value).is_some(),
            ColumnType::String => true,
            ColumnType::Geometry => false,
        }
    }

    /// Whether values of this type are ordered (range operators apply).
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ColumnType::Boolean | ColumnType::Geometry)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a boolean literal the way the bulk loader will accept it.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "t" | "yes" | "y" => Some(true),
        "false" | "f" | "no" | "n" => Some(false),
        _ => None,
    }
}

/// A column of a staging or canonical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    pub column_type: ColumnType,
    pub nullable: bool,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>, column_type: ColumnType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            column_type,
            nullable,
        }
    }
}

/// Normalize a header or human name into a lowercase, `_`-delimited slug.
///
/// Runs of whitespace and punctuation collapse into a single delimiter and
/// non-ASCII characters are dropped.
pub fn slugify(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .map(|word| word.chars().filter(char::is_ascii).collect::<String>())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hooded Figure ID"), "hooded_figure_id");
        assert_eq!(slugify("  Date (of event)  "), "date_of_event");
        assert_eq!(slugify("lat"), "lat");
        assert_eq!(slugify("Zip-Code/Postal"), "zip_code_postal");
        assert_eq!(slugify("café opened"), "caf_opened");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_accepts() {
        assert!(ColumnType::Boolean.accepts("TRUE"));
        assert!(!ColumnType::Boolean.accepts("1"));
        assert!(ColumnType::Integer.accepts("-42"));
        assert!(!ColumnType::Integer.accepts("3000000000"));
        assert!(ColumnType::BigInteger.accepts("3000000000"));
        assert!(ColumnType::Float.accepts("41.88"));
        assert!(!ColumnType::Float.accepts("inf"));
        assert!(ColumnType::Date.accepts("2015-06-01"));
        assert!(ColumnType::Date.accepts("06/01/2015"));
        assert!(ColumnType::Time.accepts("08:15"));
        assert!(ColumnType::Timestamp.accepts("06/01/2015 08:15:00 AM"));
        assert!(!ColumnType::Timestamp.accepts("2015-06-01"));
        assert!(ColumnType::String.accepts("anything"));
    }

    #[test]
    fn test_from_hint() {
        assert_eq!(ColumnType::from_hint("datetime"), Some(ColumnType::Timestamp));
        assert_eq!(ColumnType::from_hint("Big_Integer"), Some(ColumnType::BigInteger));
        assert_eq!(ColumnType::from_hint("money"), None);
    }

    #[test]
    fn test_from_postgres() {
        assert_eq!(
            ColumnType::from_postgres("timestamp without time zone", "timestamp"),
            ColumnType::Timestamp
        );
        assert_eq!(ColumnType::from_postgres("USER-DEFINED", "geometry"), ColumnType::Geometry);
        assert_eq!(ColumnType::from_postgres("character varying", "varchar"), ColumnType::String);
        assert_eq!(ColumnType::from_postgres("double precision", "float8"), ColumnType::Float);
    }
}
