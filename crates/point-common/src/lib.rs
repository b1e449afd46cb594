//! Common types and utilities shared by the point dataset crates.

pub mod bbox;
pub mod column;
pub mod geometry;
pub mod sql;
pub mod time;

pub use bbox::BoundingBox;
pub use column::{slugify, ColumnDescriptor, ColumnType};
pub use geometry::{extract_first_geometry_fragment, GeoFragment, GeometryError, WithinFilter};
pub use sql::{canonical_table_name, index_name, quote_ident, staging_table_name};
pub use time::{parse_datetime, AggUnit, TimeParseError};

/// Name of the canonical identity column (renamed business key).
pub const IDENTITY_COLUMN: &str = "point_id";

/// Name of the derived timestamp column.
pub const POINT_DATE_COLUMN: &str = "point_date";

/// Name of the derived point geometry column.
pub const GEOM_COLUMN: &str = "geom";

/// Name of the row-position column injected into staging tables.
pub const LINE_NUMBER_COLUMN: &str = "line_num";

/// Spatial reference for every stored geometry.
pub const SRID: i32 = 4326;
