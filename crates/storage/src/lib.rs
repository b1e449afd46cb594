//! Storage abstractions for point dataset services.
//!
//! Provides:
//! - PostgreSQL metadata catalog for point and shapefile datasets
//! - Runtime discovery of canonical table schemas
//! - An injected LRU cache of discovered schemas
//! - Typed outcomes for transactions allowed to fail on their own

pub mod catalog;
pub mod descriptor;
pub mod error;
pub mod schema;
pub mod schema_cache;
pub mod shape;
pub mod tx;

pub use catalog::{Catalog, MetadataStore};
pub use descriptor::{
    url_hash, ContributedType, DatasetDescriptor, DatasetExtent, LocationStrategy,
    DEFAULT_UPDATE_FREQ,
};
pub use error::{StorageError, StorageResult};
pub use schema::{discover_table_schema, TableSchema};
pub use schema_cache::{SchemaCache, SchemaCacheStats};
pub use shape::{ShapeCatalog, ShapeDescriptor};
pub use tx::TxOutcome;
