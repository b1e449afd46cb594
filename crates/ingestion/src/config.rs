//! Options controlling an ingest attempt.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which staging row survives when several share a business key.
///
/// Rows are compared by their position in the source file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Keep the row that appears first in the file.
    #[default]
    KeepFirst,
    /// Keep the row that appears last in the file.
    KeepLast,
}

impl DedupPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupPolicy::KeepFirst => "keep_first",
            DedupPolicy::KeepLast => "keep_last",
        }
    }
}

impl FromStr for DedupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "keep_first" | "first" => Ok(DedupPolicy::KeepFirst),
            "keep_last" | "last" => Ok(DedupPolicy::KeepLast),
            other => Err(format!(
                "unknown dedup policy '{}', expected keep_first or keep_last",
                other
            )),
        }
    }
}

/// How remote sources are downloaded.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Whole-request timeout for remote downloads.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
        }
    }
}

/// Options for point dataset ingestion.
#[derive(Debug, Clone)]
pub struct EtlOptions {
    pub dedup_policy: DedupPolicy,
    /// Leave the staging table in place when an attempt fails.
    pub keep_staging_on_failure: bool,
    /// Datasets re-ingested at once by frequency-driven updates.
    pub parallel_ingests: usize,
    pub fetch: FetchOptions,
}

impl Default for EtlOptions {
    fn default() -> Self {
        Self {
            dedup_policy: DedupPolicy::default(),
            keep_staging_on_failure: false,
            parallel_ingests: 2,
            fetch: FetchOptions::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_policy_parse() {
        assert_eq!("keep_first".parse(), Ok(DedupPolicy::KeepFirst));
        assert_eq!("KEEP_LAST".parse(), Ok(DedupPolicy::KeepLast));
        assert!("newest".parse::<DedupPolicy>().is_err());
        assert_eq!(DedupPolicy::default(), DedupPolicy::KeepFirst);
    }

    #[test]
    fn test_dedup_policy_serde() {
        let p: DedupPolicy = serde_json::from_str("\"keep_last\"").unwrap();
        assert_eq!(p, DedupPolicy::KeepLast);
        assert_eq!(p.as_str(), "keep_last");
    }
}
