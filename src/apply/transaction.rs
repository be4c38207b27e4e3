//! Backup-then-commit-or-rollback over the install tree.
//!
//! A [`Transaction`] owns one private backup directory below the install root.
//! Every file the transaction replaces or deletes is first preserved there under
//! its install-relative path:
//!
//! - a file about to be **replaced** is hard-linked into the backup (copied where
//!   the filesystem has no hard links), then the new content is renamed over it,
//!   so the live path always holds one complete version
//! - a file about to be **deleted** is moved into the backup
//!
//! [`Transaction::commit`] discards the backup. [`Transaction::rollback`] removes
//! files the transaction created, renames every backed-up file back into place
//! and removes directories the transaction created.

use anyhow::{Context, Result, bail};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::journal::{Journal, JournalPhase};
use crate::constants::BACKUP_DIR_PREFIX;
use crate::core::UpkeepError;
use crate::utils::fs::{
    atomic_copy, ensure_dir, join_relative, move_file, relative_parent, relative_slash_path,
    remove_dir_all, remove_dir_if_empty,
};

/// One apply against an install tree.
#[derive(Debug)]
pub struct Transaction {
    install_root: PathBuf,
    backup_dir: PathBuf,
    journal: Journal,
    preserved: usize,
    created_files: Vec<PathBuf>,
    created_dirs: Vec<PathBuf>,
    vacated_dirs: BTreeSet<String>,
}

/// Result of a committed transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    /// Files whose previous version was preserved.
    pub preserved: usize,
    /// Directories removed because deletions left them empty.
    pub pruned_dirs: usize,
}

fn create_private_dir(path: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)
}

impl Transaction {
    /// Creates the backup directory and writes the journal.
    pub fn begin(install_root: &Path) -> Result<Self> {
        let name = format!("{BACKUP_DIR_PREFIX}{}", Uuid::new_v4().simple());
        let backup_dir = install_root.join(&name);
        create_private_dir(&backup_dir).with_context(|| {
            format!("Failed to create backup directory: {}", backup_dir.display())
        })?;

        let journal = Journal::new(name);
        if let Err(e) = journal.write(install_root) {
            let _ = fs::remove_dir(&backup_dir);
            return Err(e);
        }

        info!("Started update transaction, backup in {}", backup_dir.display());
        Ok(Self {
            install_root: install_root.to_path_buf(),
            backup_dir,
            journal,
            preserved: 0,
            created_files: Vec::new(),
            created_dirs: Vec::new(),
            vacated_dirs: BTreeSet::new(),
        })
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Checks the directories leading to `relative`'s parent, creating missing ones
    /// when `create` is set.
    ///
    /// Refuses to descend through symlinks so a write can never leave the install root.
    fn prepare_parents(&mut self, relative: &str, create: bool) -> Result<()> {
        let Some(parent) = relative_parent(relative) else {
            return Ok(());
        };

        let mut current = self.install_root.clone();
        for segment in parent.split('/') {
            current.push(segment);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(UpkeepError::PathTraversal {
                        entry: relative.to_string(),
                    }
                    .into());
                }
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => bail!("Expected a directory at {}", current.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound && !create => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir(&current).with_context(|| {
                        format!("Failed to create directory: {}", current.display())
                    })?;
                    debug!("Created directory {}", current.display());
                    self.created_dirs.push(current.clone());
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to inspect: {}", current.display()));
                }
            }
        }
        Ok(())
    }

    fn backup_path(&self, relative: &str) -> Result<PathBuf> {
        let path = join_relative(&self.backup_dir, relative)?;
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        Ok(path)
    }

    /// Keeps the current content of `target` in the backup without touching `target`.
    fn preserve(&mut self, relative: &str, target: &Path) -> Result<()> {
        let backup = self.backup_path(relative)?;
        if let Err(e) = fs::hard_link(target, &backup) {
            debug!("Hard link of {} failed ({}), copying", target.display(), e);
            atomic_copy(target, &backup, None)
                .with_context(|| format!("Failed to back up {}", target.display()))?;
        }
        self.preserved += 1;
        Ok(())
    }

    /// Writes `source` to `relative`, preserving any file already there.
    ///
    /// The new file carries `source`'s permission bits.
    pub fn install(&mut self, relative: &str, source: &Path) -> Result<()> {
        let target = join_relative(&self.install_root, relative)?;
        self.prepare_parents(relative, true)?;

        let existed = match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                bail!("Cannot replace directory {} with a file", target.display())
            }
            Ok(_) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to inspect: {}", target.display()));
            }
        };

        if existed {
            self.preserve(relative, &target)?;
        }

        atomic_copy(source, &target, None)
            .with_context(|| format!("Failed to install {relative}"))?;

        if !existed {
            self.created_files.push(target);
        }
        debug!("Installed {}", relative);
        Ok(())
    }

    /// Moves `relative` into the backup. A missing file is skipped.
    pub fn remove(&mut self, relative: &str) -> Result<()> {
        let target = join_relative(&self.install_root, relative)?;
        self.prepare_parents(relative, false)?;
        match fs::symlink_metadata(&target) {
            Ok(meta) if meta.is_dir() => {
                warn!("Not deleting {}: it is a directory", target.display());
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Already absent: {}", relative);
                return Ok(());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to inspect: {}", target.display()));
            }
        }

        let backup = self.backup_path(relative)?;
        move_file(&target, &backup).with_context(|| format!("Failed to remove {relative}"))?;
        self.preserved += 1;

        let mut parent = relative_parent(relative);
        while let Some(dir) = parent {
            self.vacated_dirs.insert(dir.to_string());
            parent = relative_parent(dir);
        }
        debug!("Removed {}", relative);
        Ok(())
    }

    /// Discards the backup, removes the journal and prunes emptied directories.
    pub fn commit(self) -> Result<CommitSummary> {
        if let Err(e) = remove_dir_all(&self.backup_dir) {
            warn!("Failed to discard backup directory: {:#}", e);
        }
        Journal::remove(&self.install_root)?;
        info!("Update transaction committed");

        let mut vacated: Vec<&String> = self.vacated_dirs.iter().collect();
        vacated.sort_by(|a, b| b.matches('/').count().cmp(&a.matches('/').count()).then(b.cmp(a)));

        let mut pruned_dirs = 0;
        for relative in vacated {
            let dir = match join_relative(&self.install_root, relative) {
                Ok(dir) => dir,
                Err(_) => continue,
            };
            match remove_dir_if_empty(&dir) {
                Ok(true) => {
                    debug!("Removed empty directory {}", relative);
                    pruned_dirs += 1;
                }
                Ok(false) => {}
                Err(e) => warn!("{:#}", e),
            }
        }

        Ok(CommitSummary {
            preserved: self.preserved,
            pruned_dirs,
        })
    }

    /// Restores the install tree to its state before [`Transaction::begin`].
    ///
    /// # Errors
    ///
    /// [`UpkeepError::RollbackIncomplete`] when any file could not be restored. The
    /// backup directory and journal are then left in place for manual recovery.
    pub fn rollback(mut self) -> Result<()> {
        warn!("Rolling back update transaction");
        self.journal.phase = JournalPhase::RollingBack;
        if let Err(e) = self.journal.write(&self.install_root) {
            warn!("{:#}", e);
        }

        let mut failures = 0usize;

        for file in self.created_files.iter().rev() {
            if let Err(e) = fs::remove_file(file)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!("Failed to remove {}: {}", file.display(), e);
                failures += 1;
            }
        }

        for entry in WalkDir::new(&self.backup_dir).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to walk backup directory: {}", e);
                    failures += 1;
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }
            let Some(relative) = relative_slash_path(&self.backup_dir, entry.path()) else {
                failures += 1;
                continue;
            };
            if let Err(e) = self.restore(&relative, entry.path()) {
                warn!("Failed to restore {}: {:#}", relative, e);
                failures += 1;
            }
        }

        for dir in self.created_dirs.iter().rev() {
            if let Err(e) = remove_dir_if_empty(dir) {
                warn!("{:#}", e);
            }
        }

        if failures > 0 {
            return Err(UpkeepError::RollbackIncomplete {
                backup_dir: self.backup_dir.display().to_string(),
            }
            .into());
        }

        remove_dir_all(&self.backup_dir)?;
        Journal::remove(&self.install_root)?;
        info!("Rollback complete");
        Ok(())
    }

    fn restore(&self, relative: &str, backup: &Path) -> Result<()> {
        let target = join_relative(&self.install_root, relative)?;
        if let Some(parent) = target.parent() {
            ensure_dir(parent)?;
        }
        fs::rename(backup, &target).with_context(|| {
            format!("Failed to move {} back to {}", backup.display(), target.display())
        })?;
        debug!("Restored {}", relative);
        Ok(())
    }
}
