//! Query error types.

use serde::Serialize;
use storage::StorageError;
use thiserror::Error;

/// Errors that can occur while answering a query.
#[derive(Debug, Error)]
pub enum QueryError {
    /// A parameter, field or operator was rejected. The whole request fails.
    #[error("{param}: {reason}")]
    Validation { param: String, reason: String },

    /// A named dataset is not registered or has no canonical table.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("Metadata error: {0}")]
    Metadata(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueryError {
    pub fn validation(param: impl Into<String>, reason: impl Into<String>) -> Self {
        QueryError::Validation {
            param: param.into(),
            reason: reason.into(),
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            QueryError::Validation { .. } => 400,
            QueryError::DatasetNotFound(_) => 404,
            QueryError::Metadata(StorageError::DatasetNotFound(_)) => 404,
            QueryError::Metadata(_) => 500,
            QueryError::Database(_) => 500,
        }
    }

    /// Structured body describing the failure to the caller.
    pub fn to_body(&self) -> ErrorBody {
        let param = match self {
            QueryError::Validation { param, .. } => Some(param.clone()),
            _ => None,
        };
        let message = match self {
            QueryError::Validation { reason, .. } => reason.clone(),
            // Internal failures are not echoed verbatim.
            QueryError::Metadata(_) | QueryError::Database(_) if self.status_code() == 500 => {
                "internal error".to_string()
            }
            other => other.to_string(),
        };
        ErrorBody {
            status: self.status_code(),
            param,
            message,
        }
    }
}

/// Error payload returned to query callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<String>,
    pub message: String,
}

pub type QueryResult<T> = Result<T, QueryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(QueryError::validation("agg", "bad").status_code(), 400);
        assert_eq!(QueryError::DatasetNotFound("x".into()).status_code(), 404);
        assert_eq!(
            QueryError::Metadata(StorageError::DatasetNotFound("x".into())).status_code(),
            404
        );
        assert_eq!(
            QueryError::Metadata(StorageError::Migration("boom".into())).status_code(),
            500
        );
    }

    #[test]
    fn test_validation_body_names_param() {
        let body = QueryError::validation("nonexistent", "no such column").to_body();
        assert_eq!(body.status, 400);
        assert_eq!(body.param.as_deref(), Some("nonexistent"));
        assert_eq!(body.message, "no such column");
    }

    #[test]
    fn test_internal_errors_are_not_echoed() {
        let body = QueryError::Metadata(StorageError::Migration("secret dsn".into())).to_body();
        assert_eq!(body.message, "internal error");
        assert!(body.param.is_none());
    }

    #[test]
    fn test_error_display() {
        let err = QueryError::validation("agg", "'minute' is an invalid temporal aggregation");
        assert_eq!(err.to_string(), "agg: 'minute' is an invalid temporal aggregation");
    }
}
