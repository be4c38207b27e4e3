//! On-disk record of an apply in progress.
//!
//! The journal is written before the first mutation of the install tree and
//! removed once the transaction has either committed or fully rolled back. A
//! journal found at startup therefore means a previous run died in between, and
//! the install tree may hold a mix of old and new files. Nothing resumes
//! automatically: the updater refuses to apply again until the backup directory
//! named in the journal has been dealt with.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::constants::JOURNAL_FILE;
use crate::core::UpkeepError;
use crate::utils::fs::atomic_write;

/// Where the transaction was when the journal was last written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalPhase {
    Applying,
    RollingBack,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    /// Backup directory name, relative to the install root.
    pub backup_dir: String,
    pub phase: JournalPhase,
    pub started_at: DateTime<Utc>,
}

impl Journal {
    #[must_use]
    pub fn new(backup_dir: impl Into<String>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            phase: JournalPhase::Applying,
            started_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn path(install_root: &Path) -> PathBuf {
        install_root.join(JOURNAL_FILE)
    }

    /// Atomically writes the journal into `install_root`.
    pub fn write(&self, install_root: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize journal")?;
        atomic_write(&Self::path(install_root), &json).context("Failed to write update journal")
    }

    /// Reads the journal, `None` when there is none.
    pub fn read(install_root: &Path) -> Result<Option<Self>> {
        let path = Self::path(install_root);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()));
            }
        };
        let journal = serde_json::from_str(&content)
            .with_context(|| format!("Corrupt update journal: {}", path.display()))?;
        Ok(Some(journal))
    }

    /// Removes the journal. A missing journal is not an error.
    pub fn remove(install_root: &Path) -> Result<()> {
        let path = Self::path(install_root);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
        }
    }

    /// Fails when an earlier apply or rollback was interrupted.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::RollbackIncomplete`] naming the backup directory to recover from.
    pub fn ensure_clear(install_root: &Path) -> Result<()> {
        let backup_dir = match Self::read(install_root) {
            Ok(None) => return Ok(()),
            Ok(Some(journal)) => {
                warn!(
                    "Found journal of an interrupted update started {} (phase {:?})",
                    journal.started_at, journal.phase
                );
                install_root.join(journal.backup_dir).display().to_string()
            }
            Err(e) => {
                warn!("{:#}", e);
                "unknown (journal unreadable)".to_string()
            }
        };

        Err(UpkeepError::RollbackIncomplete {
            backup_dir,
        }
        .into())
    }
}
