//! Test utilities for upkeep
//!
//! Shared by unit tests and, through the `test-utils` feature, by the
//! integration test suite:
//!
//! - [`init_test_logging`] - route `tracing` output to the test harness
//! - [`fixtures::TreeFixture`] - write and snapshot file trees
//! - [`fixtures::ArchiveBuilder`] - build ZIP and TAR archives, including hostile ones

pub mod fixtures;

pub use fixtures::{ArchiveBuilder, TreeFixture, snapshot};

use std::sync::Once;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Global flag to ensure logging is only initialized once in tests
static INIT_LOGGING: Once = Once::new();

/// Initialize logging for tests.
///
/// Only the first call has an effect. Uses `level` if given, otherwise
/// `RUST_LOG`; with neither, tests run without logging.
///
/// # Example
///
/// ```rust,no_run
/// use tracing::Level;
///
/// fn my_test() {
///     upkeep_cli::test_utils::init_test_logging(Some(Level::DEBUG));
/// }
/// ```
///
/// To enable logging in tests via environment variable:
/// ```bash
/// RUST_LOG=debug cargo test
/// ```
pub fn init_test_logging(level: Option<Level>) {
    INIT_LOGGING.call_once(|| {
        let filter = if let Some(level) = level {
            EnvFilter::new(level.to_string())
        } else if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            return;
        };

        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_ids(false)
            .try_init();
    });
}
