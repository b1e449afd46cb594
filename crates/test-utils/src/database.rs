//! Helpers for tests that run against a live database.

/// Connection URL of the test database, from `TEST_DATABASE_URL`.
pub fn test_database_url() -> Option<String> {
    std::env::var("TEST_DATABASE_URL")
        .ok()
        .filter(|url| !url.trim().is_empty())
}

/// A dataset name no other test run will use.
///
/// Canonical and staging tables are named after datasets, so tests sharing a
/// database must never reuse one.
pub fn unique_dataset_name(prefix: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &suffix[..12])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_dataset_name() {
        let a = unique_dataset_name("events");
        let b = unique_dataset_name("events");
        assert!(a.starts_with("events_"));
        assert_eq!(a.len(), "events_".len() + 12);
        assert_ne!(a, b);
    }
}
