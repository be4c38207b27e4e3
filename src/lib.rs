//! upkeep - self-updating deployment engine
//!
//! Keeps a locally installed application current by applying whole-file
//! updates shipped as archives. An update never leaves the install unusable:
//! changes are applied transactionally with a backup of every replaced file, and
//! the updater's own executable is replaced in a way the running platform allows.
//!
//! # Pipeline
//!
//! ```text
//! archive ──► extract ──► update_temp/ ──┬──► self-update check ──► exit 10 (relaunch)
//!                                        │
//! install dir ───────────────────────────┴──► diff ──► Change Manifest ──► apply ──► changes.json
//!                                                                           │
//!                                                                           └─ failure ──► rollback
//! ```
//!
//! # Modules
//!
//! ## Update engine
//! - [`archive`] - Format detection and path-safe extraction of ZIP and TAR archives
//! - [`changes`] - Change Manifest, ignore rules and the concurrent directory differ
//! - [`apply`] - Transactional application with backup, journal and rollback
//! - [`upgrade`] - Replacement of the running updater executable and version markers
//! - [`fingerprint`] - Content fingerprints used for change detection
//!
//! ## Outer surface
//! - [`cli`] - `update`, `status` and `finalize` commands
//! - [`release`] - GitHub release lookup, asset download, shutdown webhook
//! - [`config`] - `config/updater.toml` and command-line overrides
//!
//! ## Supporting modules
//! - [`core`] - Error taxonomy and user-facing error rendering
//! - [`constants`] - File names, timeouts and exit codes
//! - [`utils`] - Atomic file operations, platform helpers, unlock probing, progress
//!
//! # Install layout
//!
//! ```text
//! <install>/
//! ├── config/updater.toml      never touched by updates
//! ├── debug/                   never touched by updates
//! ├── version.txt              installed release tag
//! ├── changes.json             manifest of the last applied update
//! ├── updater.log              log of every run
//! └── ...                      application files, managed by upkeep
//! ```

pub mod apply;
pub mod archive;
pub mod changes;
pub mod cli;
pub mod config;
pub mod constants;
pub mod core;
pub mod fingerprint;
pub mod release;
pub mod upgrade;
pub mod utils;

// test_utils module is available for both unit tests and integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
