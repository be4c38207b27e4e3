use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::Permissions;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::constants::STAGED_EXE_SUFFIX;
use crate::fingerprint::{Fingerprint, fingerprint_file};
use crate::upgrade::backup::BackupManager;
use crate::utils::fs::{atomic_copy, join_relative, relative_slash_path};
use crate::utils::platform::can_replace_running_executable;

/// How the running executable is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStrategy {
    /// Rename the running executable aside and write the candidate in its place.
    ///
    /// Requires an OS that keeps a renamed, executing image alive.
    Immediate,
    /// Stage the candidate as `<exe>.new` for an external process to swap in.
    Deferred,
}

impl ReplaceStrategy {
    /// The strategy the current platform supports.
    #[must_use]
    pub const fn for_platform() -> Self {
        if can_replace_running_executable() {
            Self::Immediate
        } else {
            Self::Deferred
        }
    }
}

/// Result of [`SelfUpdater::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelfUpdateOutcome {
    /// No candidate, or the candidate matches the running executable.
    NotNeeded,
    /// The executable at the original path is now the candidate.
    Applied,
    /// The candidate is staged and waits for a relaunch.
    Pending { staged_path: PathBuf },
}

impl SelfUpdateOutcome {
    /// Whether the caller has to exit so the new executable can take over.
    #[must_use]
    pub const fn requires_restart(&self) -> bool {
        !matches!(self, Self::NotNeeded)
    }

    #[must_use]
    pub fn record(&self) -> SelfUpdateRecord {
        match self {
            Self::NotNeeded => SelfUpdateRecord::default(),
            Self::Applied => SelfUpdateRecord {
                applied: true,
                ..SelfUpdateRecord::default()
            },
            Self::Pending {
                staged_path,
            } => SelfUpdateRecord {
                pending: true,
                staged_path: Some(staged_path.clone()),
                ..SelfUpdateRecord::default()
            },
        }
    }
}

/// Flattened view of a [`SelfUpdateOutcome`], for logs and reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SelfUpdateRecord {
    pub applied: bool,
    pub pending: bool,
    pub staged_path: Option<PathBuf>,
}

/// Path a deferred candidate is staged at: `<exe>.new`.
#[must_use]
pub fn staged_path_for(executable: &Path) -> PathBuf {
    let mut staged = executable.as_os_str().to_owned();
    staged.push(STAGED_EXE_SUFFIX);
    PathBuf::from(staged)
}

fn executable_permissions() -> Option<Permissions> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        Some(Permissions::from_mode(0o755))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

async fn fingerprint(path: PathBuf) -> Result<Fingerprint> {
    tokio::task::spawn_blocking(move || fingerprint_file(&path))
        .await
        .context("Fingerprint task panicked")?
}

/// Replaces the running executable when the staged update carries a new one.
///
/// # Detection
///
/// The executable is only considered when it lives inside the install root. The
/// candidate is the file at the same relative path in the staging tree, or the
/// file with the executable's name at the staging root. Equal fingerprints mean
/// there is nothing to do and no file is touched.
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::upgrade::{ReplaceStrategy, SelfUpdateOutcome, SelfUpdater};
/// use std::path::PathBuf;
///
/// # async fn example() -> anyhow::Result<()> {
/// let updater = SelfUpdater::new(
///     std::env::current_exe()?,
///     PathBuf::from("."),
///     PathBuf::from("update_temp"),
/// )
/// .strategy(ReplaceStrategy::Deferred);
///
/// match updater.run().await? {
///     SelfUpdateOutcome::NotNeeded => println!("executable unchanged"),
///     SelfUpdateOutcome::Applied => println!("restart to use the new version"),
///     SelfUpdateOutcome::Pending { staged_path } => {
///         println!("staged at {}", staged_path.display());
///     }
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SelfUpdater {
    executable: PathBuf,
    install_root: PathBuf,
    staging_root: PathBuf,
    strategy: ReplaceStrategy,
}

impl SelfUpdater {
    /// Creates an updater using [`ReplaceStrategy::for_platform`].
    pub fn new(executable: PathBuf, install_root: PathBuf, staging_root: PathBuf) -> Self {
        Self {
            executable,
            install_root,
            staging_root,
            strategy: ReplaceStrategy::for_platform(),
        }
    }

    /// Overrides the replacement strategy.
    pub fn strategy(mut self, strategy: ReplaceStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The executable's slash-separated path relative to the install root.
    #[must_use]
    pub fn relative_path(&self) -> Option<String> {
        let canonical =
            |path: &Path| std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        relative_slash_path(&canonical(&self.install_root), &canonical(&self.executable))
            .filter(|rel| !rel.is_empty())
    }

    /// The staged file that would replace the executable, if any.
    #[must_use]
    pub fn find_candidate(&self, relative: &str) -> Option<PathBuf> {
        let same_path = join_relative(&self.staging_root, relative).ok().filter(|p| p.is_file());
        same_path.or_else(|| {
            let name = self.executable.file_name()?;
            let at_root = self.staging_root.join(name);
            at_root.is_file().then_some(at_root)
        })
    }

    /// Detects and performs the replacement.
    pub async fn run(&self) -> Result<SelfUpdateOutcome> {
        let Some(relative) = self.relative_path() else {
            debug!("{} is outside the install root", self.executable.display());
            return Ok(SelfUpdateOutcome::NotNeeded);
        };

        let Some(candidate) = self.find_candidate(&relative) else {
            debug!("Update does not contain {}", relative);
            return Ok(SelfUpdateOutcome::NotNeeded);
        };

        let current = fingerprint(self.executable.clone()).await?;
        let staged = fingerprint(candidate.clone()).await?;
        if current == staged {
            info!("Executable {} is up to date", relative);
            return Ok(SelfUpdateOutcome::NotNeeded);
        }

        info!("Executable {} changed, replacing with {:?} strategy", relative, self.strategy);
        match self.strategy {
            ReplaceStrategy::Immediate => {
                self.replace_immediately(&candidate).await?;
                Ok(SelfUpdateOutcome::Applied)
            }
            ReplaceStrategy::Deferred => {
                let staged_path = self.stage_deferred(&candidate).await?;
                Ok(SelfUpdateOutcome::Pending {
                    staged_path,
                })
            }
        }
    }

    async fn replace_immediately(&self, candidate: &Path) -> Result<()> {
        let backup = BackupManager::new(self.executable.clone());
        backup.move_aside().await?;

        let source = candidate.to_path_buf();
        let target = self.executable.clone();
        let copied = tokio::task::spawn_blocking(move || {
            atomic_copy(&source, &target, executable_permissions())
        })
        .await
        .context("Executable copy task panicked")
        .and_then(|result| result);

        if let Err(e) = copied {
            warn!("Replacing executable failed: {:#}", e);
            if let Err(restore_error) = backup.restore().await {
                return Err(e.context(format!(
                    "Previous executable could not be restored from {}: {restore_error:#}",
                    backup.backup_path().display()
                )));
            }
            return Err(e.context("Failed to replace the running executable"));
        }

        info!("Replaced {}", self.executable.display());
        Ok(())
    }

    async fn stage_deferred(&self, candidate: &Path) -> Result<PathBuf> {
        let staged_path = staged_path_for(&self.executable);
        let source = candidate.to_path_buf();
        let target = staged_path.clone();
        tokio::task::spawn_blocking(move || {
            atomic_copy(&source, &target, executable_permissions())
        })
        .await
        .context("Executable copy task panicked")?
        .with_context(|| format!("Failed to stage {}", staged_path.display()))?;

        info!("Staged new executable at {}", staged_path.display());
        Ok(staged_path)
    }
}

/// Swaps a staged `<exe>.new` into place.
///
/// Must run in a process other than `executable` on platforms that lock running
/// images. The current executable is kept as `<exe>.old` and put back if the swap
/// fails. Returns whether a staged executable was found.
pub async fn complete_pending_swap(executable: &Path) -> Result<bool> {
    let staged = staged_path_for(executable);
    if !staged.is_file() {
        debug!("No staged executable at {}", staged.display());
        return Ok(false);
    }

    let backup = BackupManager::new(executable.to_path_buf());
    let had_previous = executable.exists();
    if had_previous {
        backup.move_aside().await?;
    }

    if let Err(e) = tokio::fs::rename(&staged, executable).await {
        if had_previous {
            backup.restore().await?;
        }
        return Err(e).with_context(|| {
            format!("Failed to move {} into place", staged.display())
        });
    }

    info!("Completed pending swap of {}", executable.display());
    Ok(true)
}

/// Removes `<exe>.old` left by an earlier replacement. Failures are logged only.
pub async fn cleanup_previous_version(executable: &Path) -> bool {
    match BackupManager::new(executable.to_path_buf()).cleanup().await {
        Ok(removed) => removed,
        Err(e) => {
            debug!("Previous version still in use: {:#}", e);
            false
        }
    }
}
