//! Global constants used throughout the upkeep codebase.
//!
//! This module contains well-known file names, timeout durations, retry
//! parameters and exit codes that are used across multiple modules. Defining
//! them centrally keeps the on-disk layout of an install discoverable in one
//! place.

use std::time::Duration;

/// Name of the staging directory the orchestrator extracts into, relative to the install root.
pub const STAGING_DIR_NAME: &str = "update_temp";

/// Name of the persisted (and optionally pre-computed) change manifest.
pub const CHANGES_FILE: &str = "changes.json";

/// Log file written in the install root. Stdout is reserved for JSON results.
pub const LOG_FILE: &str = "updater.log";

/// Single-line version marker in the install root.
pub const VERSION_FILE: &str = "version.txt";

/// Directory holding user configuration, never touched by an update.
pub const CONFIG_DIR: &str = "config";

/// Updater configuration file inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "updater.toml";

/// Directory holding diagnostics, never touched by an update.
pub const DEBUG_DIR: &str = "debug";

/// Prefix of the per-apply backup staging directory.
pub const BACKUP_DIR_PREFIX: &str = ".upkeep-backup-";

/// Journal marking an apply or rollback in progress.
pub const JOURNAL_FILE: &str = ".upkeep-journal.json";

/// Suffix of the moved-aside previous executable.
pub const PREVIOUS_EXE_SUFFIX: &str = ".old";

/// Suffix of a staged executable awaiting a deferred swap.
pub const STAGED_EXE_SUFFIX: &str = ".new";

/// Exit code telling the launcher that the updater replaced or staged itself
/// and must be relaunched.
pub const EXIT_CODE_SELF_UPDATE: i32 = 10;

/// Generic failure exit code.
pub const EXIT_CODE_ERROR: i32 = 1;

/// Lower bound of the differ's fingerprinting pool.
pub const MIN_DIFF_WORKERS: usize = 2;

/// Upper bound of the differ's fingerprinting pool.
///
/// Hashing is I/O bound beyond this point, more threads only add seek pressure.
pub const MAX_DIFF_WORKERS: usize = 16;

/// Default CPU core count when detection fails.
pub const FALLBACK_CORE_COUNT: usize = 4;

/// Capacity of the channel between the tree walker and the hashing workers.
pub const DIFF_QUEUE_CAPACITY: usize = 256;

/// Read buffer used when streaming a file through the hasher.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// How long to wait for the application to release its executable.
pub const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll interval of the unlock probe.
pub const LOCK_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Timeout for the shutdown notification request.
pub const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(5);

/// Grace period granted to the application after a successful shutdown notification.
pub const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(2);

/// Timeout for a single release metadata request.
pub const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Default number of retries for metadata fetches and downloads.
pub const DEFAULT_MAX_RETRIES: usize = 3;

/// Default overall deadline for a download including all retries (10 minutes).
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Maximum delay between two download attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Default GitHub API base used to resolve releases.
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// User agent sent with every outbound request (GitHub rejects requests without one).
pub const USER_AGENT: &str = concat!("upkeep/", env!("CARGO_PKG_VERSION"));
