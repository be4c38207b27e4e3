use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::constants::PREVIOUS_EXE_SUFFIX;

/// Keeps the previous version of an executable beside it while it is replaced.
///
/// The previous version lives at `<exe>.old` in the executable's directory. It is
/// created by *renaming* the executable, never by copying it: on platforms that
/// allow it, a running process keeps executing from the renamed file while a new
/// file is put at the original path.
///
/// # Lifecycle
///
/// 1. [`move_aside`](Self::move_aside) renames `<exe>` to `<exe>.old`
/// 2. the new executable is written to `<exe>`
/// 3. on failure, [`restore`](Self::restore) renames `<exe>.old` back
/// 4. on the next start, [`cleanup`](Self::cleanup) removes `<exe>.old`
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::upgrade::backup::BackupManager;
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let manager = BackupManager::new(PathBuf::from("/opt/app/app"));
/// manager.move_aside().await?;
///
/// let install_failed = false;
/// if install_failed {
///     manager.restore().await?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BackupManager {
    /// Path to the executable.
    original_path: PathBuf,
    /// Path of the previous version beside it.
    backup_path: PathBuf,
}

impl BackupManager {
    /// Creates a manager for `executable_path`. The previous version goes to `<exe>.old`.
    pub fn new(executable_path: PathBuf) -> Self {
        let mut backup_path = executable_path.clone().into_os_string();
        backup_path.push(PREVIOUS_EXE_SUFFIX);

        Self {
            original_path: executable_path,
            backup_path: PathBuf::from(backup_path),
        }
    }

    /// Renames the executable to its previous-version path.
    ///
    /// A stale previous version from an earlier update is removed first.
    ///
    /// # Errors
    ///
    /// Fails when the executable does not exist, the stale previous version cannot
    /// be removed, or the rename is refused (e.g. the file is locked).
    pub async fn move_aside(&self) -> Result<()> {
        if !self.original_path.exists() {
            bail!("Executable does not exist: {}", self.original_path.display());
        }

        if self.backup_path.exists() {
            debug!("Removing stale previous version at {}", self.backup_path.display());
            fs::remove_file(&self.backup_path)
                .await
                .context("Failed to remove stale previous version")?;
        }

        info!("Moving {} aside to {}", self.original_path.display(), self.backup_path.display());
        fs::rename(&self.original_path, &self.backup_path)
            .await
            .with_context(|| format!("Failed to rename {}", self.original_path.display()))?;
        Ok(())
    }

    /// Puts the previous version back at the executable path.
    ///
    /// Retries a few times, since a half-written replacement may still be held
    /// open briefly by antivirus scanners on Windows.
    pub async fn restore(&self) -> Result<()> {
        if !self.backup_path.exists() {
            bail!("No previous version found at {}", self.backup_path.display());
        }

        warn!("Restoring previous version from {}", self.backup_path.display());

        let mut attempts = 0;
        const MAX_ATTEMPTS: u32 = 3;

        while attempts < MAX_ATTEMPTS {
            match self.attempt_restore().await {
                Ok(()) => {
                    info!("Restored previous version");
                    return Ok(());
                }
                Err(e) if attempts < MAX_ATTEMPTS - 1 => {
                    warn!("Restore attempt {} failed: {}. Retrying...", attempts + 1, e);
                    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }

        bail!("Failed to restore previous version after {MAX_ATTEMPTS} attempts")
    }

    async fn attempt_restore(&self) -> Result<()> {
        // Remove whatever partial replacement is in the way
        if self.original_path.exists() {
            fs::remove_file(&self.original_path)
                .await
                .context("Failed to remove partial replacement")?;
        }

        fs::rename(&self.backup_path, &self.original_path)
            .await
            .context("Failed to rename previous version back")?;
        Ok(())
    }

    /// Removes the previous version. Returns whether one was removed.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be removed, typically because the
    /// process that was started from it is still running.
    pub async fn cleanup(&self) -> Result<bool> {
        match fs::remove_file(&self.backup_path).await {
            Ok(()) => {
                debug!("Removed previous version at {}", self.backup_path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| {
                format!("Failed to remove previous version: {}", self.backup_path.display())
            }),
        }
    }

    pub fn backup_exists(&self) -> bool {
        self.backup_path.exists()
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn original_path(&self) -> &Path {
        &self.original_path
    }
}
