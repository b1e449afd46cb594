//! Error types for the ingestion crate.

use storage::StorageError;
use thiserror::Error;

/// Errors that can occur during an ingest attempt.
///
/// The variant names the stage that failed; every variant aborts the attempt.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Configuration error for '{dataset}': {message}")]
    Configuration { dataset: String, message: String },

    #[error("Failed to fetch source '{location}': {message}")]
    SourceFetch { location: String, message: String },

    #[error("Failed to load staging table '{table}': {source}")]
    Load {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to derive canonical rows for '{dataset}': {source}")]
    Derivation {
        dataset: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Failed to merge into '{table}': {source}")]
    Merge {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Metadata error: {0}")]
    Metadata(#[from] StorageError),

    #[error("Shapefile import failed: {0}")]
    Shapefile(String),

    #[error("Failed to read source data: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EtlError {
    pub fn configuration(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        EtlError::Configuration {
            dataset: dataset.into(),
            message: message.into(),
        }
    }

    pub fn source_fetch(location: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EtlError::SourceFetch {
            location: location.into(),
            message: message.to_string(),
        }
    }
}

/// Whether a database error raised while inserting derived rows came from
/// the values themselves: SQLSTATE class 22 (data exception, e.g. an
/// uncastable date) or 23502 (NULL in a NOT NULL column).
pub fn is_derivation_failure(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.starts_with("22") || code == "23502")
        .unwrap_or(false)
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, EtlError>;
