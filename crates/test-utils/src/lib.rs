//! Shared test utilities for the point dataset workspace.
//!
//! This crate provides common testing infrastructure including:
//! - A skip macro for tests needing a live PostGIS database
//! - CSV and descriptor fixtures
//! - An in-memory metadata store
//!
//! # Usage
//!
//! Add to your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { path = "../test-utils" }
//! ```
//!
//! Then import in your tests:
//!
//! ```ignore
//! use test_utils::{require_database, fixtures};
//! ```

pub mod database;
pub mod fixtures;
pub mod memory_store;

// Re-export commonly used items at the crate root
pub use database::*;
pub use fixtures::*;
pub use memory_store::MemoryMetaStore;

/// Macro to skip a test if no test database is configured.
///
/// Evaluates to the connection URL taken from `TEST_DATABASE_URL`. The
/// database must have the PostGIS extension available.
///
/// # Usage
///
/// ```ignore
/// use test_utils::require_database;
///
/// #[tokio::test]
/// async fn test_ingest() {
///     let url = require_database!();
///     // Test code using url...
/// }
/// ```
///
/// If the variable is unset, the test prints a skip message and returns early.
#[macro_export]
macro_rules! require_database {
    () => {{
        match $crate::test_database_url() {
            Some(url) => url,
            None => {
                eprintln!("SKIPPED: TEST_DATABASE_URL not set. Point it at a PostGIS database.");
                return;
            }
        }
    }};
}

/// Macro for approximate floating-point equality assertions.
///
/// # Usage
///
/// ```ignore
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(1.0001_f64, 1.0_f64, 0.001_f64); // passes
/// assert_approx_eq!(1.1_f32, 1.0_f32, 0.001_f32);    // fails
/// ```
#[macro_export]
macro_rules! assert_approx_eq {
    ($left:expr, $right:expr, $epsilon:expr) => {{
        let left: f64 = $left as f64;
        let right: f64 = $right as f64;
        let epsilon: f64 = $epsilon as f64;
        let diff = (left - right).abs();
        if diff > epsilon {
            panic!(
                "assertion failed: `(left ≈ right)`\n  left: `{:?}`,\n right: `{:?}`,\n  diff: `{:?}` > epsilon `{:?}`",
                left, right, diff, epsilon
            );
        }
    }};
}
