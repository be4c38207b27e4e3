//! Replacement of the updater's own executable.
//!
//! The executable that runs the update may itself be part of the install tree.
//! It is excluded from the ordinary diff and handled here, because a running
//! image cannot always be overwritten like any other file.
//!
//! # Components
//!
//! - **[`SelfUpdater`]**: detects a changed executable in the staging tree and
//!   replaces it with the configured [`ReplaceStrategy`]
//! - **[`backup::BackupManager`]**: keeps the previous executable at `<exe>.old`
//!   while it is replaced and restores it on failure
//! - **[`version_check`]**: the installed version marker and release comparison
//!
//! # Strategies
//!
//! ```text
//! Immediate (Unix)                      Deferred (Windows)
//!   rename  app -> app.old                copy candidate -> app.new
//!   copy    candidate -> app              report Pending, exit with code 10
//!   failure: rename app.old -> app        relauncher: finalize swaps app.new in
//! ```
//!
//! The strategy is picked from [`crate::utils::platform::can_replace_running_executable`]
//! and can be overridden, so both paths run on every platform in tests.

/// Previous-version handling for the executable being replaced.
pub mod backup;
/// Detection and replacement of a changed executable.
pub mod self_updater;
/// Installed version marker and version comparison.
pub mod version_check;

pub use self_updater::{
    ReplaceStrategy, SelfUpdateOutcome, SelfUpdateRecord, SelfUpdater, cleanup_previous_version,
    complete_pending_swap, staged_path_for,
};
pub use version_check::{UpdateCheck, VersionMarker, is_newer};
