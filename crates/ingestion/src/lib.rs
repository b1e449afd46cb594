//! Point dataset ingestion library.
//!
//! Loads CSV sources into per-dataset canonical PostGIS tables and imports
//! zipped shapefiles.
//!
//! # Architecture
//!
//! A point ingest runs these stages, each with its own error variant:
//!
//! - Source fetch (local path or HTTP download to a temp file)
//! - Column resolution (existing canonical schema, type hints, or inference)
//! - Staging load (`COPY` into `staging_<dataset>`, rows numbered by `line_num`)
//! - Deduplication of business keys by file position
//! - Derivation of `point_date` and `geom` plus merge into `dat_<dataset>`
//! - Metadata refresh (extent and bounding box), reported separately

pub mod config;
pub mod derive;
pub mod error;
pub mod inference;
pub mod merge;
mod pipeline;
pub mod shape;
pub mod source;
pub mod staging;

// Re-exports
pub use config::{DedupPolicy, EtlOptions, FetchOptions};
pub use error::{EtlError, Result};
pub use inference::{infer_columns, normalize_headers};
pub use pipeline::{IngestReport, PointEtl};
pub use shape::ShapeEtl;
pub use source::SourceFile;
