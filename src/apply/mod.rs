//! Transactional application of a change manifest to the install tree.
//!
//! [`apply_changes`] runs one [`Transaction`]: `added` then `modified` paths are
//! installed from the staging tree in manifest order, then `deleted` paths are
//! moved aside. Any failure rolls the whole transaction back before the error is
//! returned, so the install tree is either fully updated or byte-identical to
//! its previous state.
//!
//! ```text
//! begin ──► install added+modified ──► remove deleted ──► commit ──► prune empty dirs
//!                      │                       │
//!                      └──────── error ────────┴──► rollback ──► ApplyFailed
//!                                                        │
//!                                                        └─ replay failed ──► RollbackIncomplete
//! ```

pub mod journal;
pub mod transaction;

use anyhow::Result;
use std::path::Path;
use tracing::{error, info};

use crate::changes::ChangeManifest;
use crate::core::UpkeepError;
use crate::utils::fs::join_relative;

pub use journal::{Journal, JournalPhase};
pub use transaction::{CommitSummary, Transaction};

/// What a successful apply changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Files written from the staging tree.
    pub installed: usize,
    /// Files removed from the install tree.
    pub removed: usize,
    /// Directories removed because they became empty.
    pub pruned_dirs: usize,
}

fn run_steps(
    tx: &mut Transaction,
    staging_root: &Path,
    manifest: &ChangeManifest,
) -> Result<(), (String, anyhow::Error)> {
    for relative in manifest.added.iter().chain(&manifest.modified) {
        join_relative(staging_root, relative)
            .and_then(|source| tx.install(relative, &source))
            .map_err(|e| (relative.clone(), e))?;
    }

    for relative in &manifest.deleted {
        tx.remove(relative).map_err(|e| (relative.clone(), e))?;
    }

    Ok(())
}

/// Applies `manifest` to `install_root` using files from `staging_root`.
///
/// # Errors
///
/// - [`UpkeepError::RollbackIncomplete`] when a previous run left a journal, or
///   when this run's rollback could not restore every file
/// - [`UpkeepError::ApplyFailed`] (as the outermost context over the cause) when
///   a step failed and the install tree was fully restored
pub fn apply_changes(
    install_root: &Path,
    staging_root: &Path,
    manifest: &ChangeManifest,
) -> Result<ApplySummary> {
    Journal::ensure_clear(install_root)?;

    info!(
        "Applying {} added, {} modified, {} deleted",
        manifest.added.len(),
        manifest.modified.len(),
        manifest.deleted.len()
    );

    let mut tx = Transaction::begin(install_root)?;
    match run_steps(&mut tx, staging_root, manifest) {
        Ok(()) => {
            let summary = tx.commit()?;
            info!("Update applied, {} directories pruned", summary.pruned_dirs);
            Ok(ApplySummary {
                installed: manifest.added.len() + manifest.modified.len(),
                removed: manifest.deleted.len(),
                pruned_dirs: summary.pruned_dirs,
            })
        }
        Err((path, cause)) => {
            error!("Applying {} failed: {:#}", path, cause);
            tx.rollback()?;
            Err(cause.context(UpkeepError::ApplyFailed {
                path,
            }))
        }
    }
}
