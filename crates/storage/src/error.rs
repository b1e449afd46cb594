//! Error types for the storage crate.

use thiserror::Error;

/// Result type alias using StorageError.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the metadata store and schema discovery.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Dataset already registered: {0}")]
    DatasetExists(String),

    #[error("Invalid metadata for '{dataset}': {message}")]
    InvalidMetadata { dataset: String, message: String },
}

impl StorageError {
    pub fn invalid_metadata(dataset: impl Into<String>, message: impl Into<String>) -> Self {
        StorageError::InvalidMetadata {
            dataset: dataset.into(),
            message: message.into(),
        }
    }
}
