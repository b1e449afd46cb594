//! Query side of the point dataset store.
//!
//! Requests arrive as flat string-to-string parameters. Named parameters
//! (aggregation unit, date window, dataset list, area, paging) are validated
//! first; the remaining `field__operator` keys are compiled against the
//! target table's discovered schema.
//!
//! # Example
//!
//! ```rust
//! use point_query::params::{parse_pairs, NamedParams};
//! use chrono::NaiveDate;
//!
//! let now = NaiveDate::from_ymd_opt(2015, 7, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
//! let mut raw = parse_pairs(["agg=week", "dataset_name__in=crimes,permits"]);
//! let named = NamedParams::extract(&mut raw, now).unwrap();
//! assert_eq!(named.datasets.unwrap().len(), 2);
//! ```

pub mod detail;
pub mod errors;
pub mod operators;
pub mod params;
pub mod predicate;
pub mod service;
pub mod timeseries;

pub use detail::DetailResponse;
pub use errors::{ErrorBody, QueryError, QueryResult};
pub use operators::Operator;
pub use params::{parse_pairs, NamedParams, OutputFormat, RawParams};
pub use predicate::{compile_filters, CompiledFilters, Condition, FilterValue, TypedValue};
pub use service::PointQuery;
pub use timeseries::{narrow_candidates, TimeseriesEntry, TimeseriesResponse};
