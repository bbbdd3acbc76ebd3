pub mod config;

/// Common utilities shared across the workspace
///
/// - Configuration loading
/// - Shared test database helpers

// Test helpers module - available for both development and test builds
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

// Re-export commonly used test utilities for easier access
#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::{
    count_rows, create_test_connection_with, get_test_database_url, truncate_tables,
};
