//! Download or take an update archive and apply it to the install tree.
//!
//! # Sequence
//!
//! 1. Refuse to run while a previous rollback is unfinished
//! 2. Remove `<exe>.old` left by an earlier self-update
//! 3. With `--repo`: compare `version.txt` with the latest release, report the
//!    `check` phase, download the platform asset
//! 4. Extract into `update_temp/`
//! 5. Replace the updater itself if the update carries a new one; when it does,
//!    stop here and exit with code 10 so the launcher restarts the new updater
//! 6. Ask the application to shut down, then wait until its executable is free
//! 7. Diff (or read the shipped `changes.json`) and apply transactionally
//! 8. Persist `changes.json` and `version.txt`, restart the application
//!
//! # Examples
//!
//! ```bash
//! # Apply a local archive, restarting the application afterwards
//! upkeep update --archive app-linux-x64.tar.gz --restart-cmd "./app"
//!
//! # Check GitHub for a newer release without installing it
//! upkeep update --repo acme/app --check-only
//!
//! # Full unattended update through a proxy
//! upkeep update --repo acme/app --proxy http://proxy:3128 \
//!     --webhook http://127.0.0.1:8080/shutdown --restart-cmd "./app"
//! ```

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{error, info, warn};

use super::CommandContext;
use super::output::{Phase, Status, UpdateResult};
use crate::apply::{Journal, apply_changes};
use crate::archive::extract_archive;
use crate::changes::{effective_workers, load_or_diff};
use crate::config::{ConfigOverrides, UpdaterConfig};
use crate::constants::{LOCK_POLL_INTERVAL, SHUTDOWN_GRACE_PERIOD, STAGING_DIR_NAME};
use crate::core::{UpkeepError, user_friendly_error};
use crate::release::{ReleaseClient, notify_shutdown};
use crate::upgrade::{
    ReplaceStrategy, SelfUpdateOutcome, SelfUpdater, UpdateCheck, VersionMarker,
    cleanup_previous_version,
};
use crate::utils::fs::{relative_slash_path, remove_dir_all};
use crate::utils::platform::{command_program, spawn_detached_shell};
use crate::utils::unlock::wait_for_unlock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Immediate,
    Deferred,
}

impl From<StrategyArg> for ReplaceStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Immediate => Self::Immediate,
            StrategyArg::Deferred => Self::Deferred,
        }
    }
}

/// Command to update the installed application.
#[derive(Args, Debug)]
pub struct UpdateCommand {
    /// Update archive to apply (.zip, .tar, .tar.gz). Takes precedence over --repo
    #[arg(long, value_name = "PATH")]
    archive: Option<PathBuf>,

    /// GitHub repository to fetch the latest release from
    #[arg(long, value_name = "OWNER/NAME", env = "UPKEEP_REPO")]
    repo: Option<String>,

    /// Proxy for release metadata, downloads and the shutdown webhook
    #[arg(long, value_name = "URL", env = "UPKEEP_PROXY")]
    proxy: Option<String>,

    /// Only report whether a newer release exists
    #[arg(long)]
    check_only: bool,

    /// URL requested (GET) to make the application exit before files are replaced
    #[arg(long, value_name = "URL", env = "UPKEEP_WEBHOOK")]
    webhook: Option<String>,

    /// Command that starts the application again once the update is applied
    #[arg(long, value_name = "CMD", env = "UPKEEP_RESTART_CMD")]
    restart_cmd: Option<String>,

    /// Number of fingerprinting workers (default: derived from CPU count)
    #[arg(long, value_name = "N", env = "UPKEEP_WORKERS")]
    workers: Option<usize>,

    /// Executable treated as the running updater
    #[arg(long, value_name = "PATH", hide = true)]
    executable: Option<PathBuf>,

    /// Force a self-update strategy instead of the platform's
    #[arg(long, value_enum, hide = true)]
    self_update_strategy: Option<StrategyArg>,
}

/// Where the archive came from and what it installs.
struct UpdateSource {
    archive: PathBuf,
    version: Option<String>,
    /// Keeps a downloaded archive alive until the update finished.
    _download_dir: Option<TempDir>,
}

impl UpdateCommand {
    /// Runs the update and prints the JSON result of every phase.
    ///
    /// Returns the process exit code; failures are reported, not propagated.
    pub async fn execute(self, ctx: &CommandContext) -> i32 {
        let mut phase = if self.archive.is_some() {
            Phase::Update
        } else {
            Phase::Check
        };

        let result = match self.run(ctx, &mut phase).await {
            Ok(result) => result,
            Err(e) => {
                error!("Update failed: {:#}", e);
                UpdateResult::failed(phase, &user_friendly_error(&e))
            }
        };

        result.emit();
        result.exit_code()
    }

    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            repository: self.repo.clone(),
            proxy: self.proxy.clone(),
            webhook: self.webhook.clone(),
            restart_cmd: self.restart_cmd.clone(),
            diff_workers: self.workers,
        }
    }

    fn strategy(&self) -> ReplaceStrategy {
        self.self_update_strategy.map_or_else(ReplaceStrategy::for_platform, ReplaceStrategy::from)
    }

    async fn run(&self, ctx: &CommandContext, phase: &mut Phase) -> Result<UpdateResult> {
        let install_root = ctx.install_root.as_path();
        let config = UpdaterConfig::load(install_root, ctx.config_path.as_deref())
            .await?
            .with_overrides(self.overrides());
        config.validate()?;

        Journal::ensure_clear(install_root)?;

        let executable = match &self.executable {
            Some(path) => path.clone(),
            None => std::env::current_exe().context("Failed to locate the running executable")?,
        };
        if cleanup_previous_version(&executable).await {
            info!("Removed previous updater version");
        }

        let client = ReleaseClient::new(&config, ctx.show_progress)?;
        let source = match &self.archive {
            Some(archive) => UpdateSource {
                archive: archive.clone(),
                version: None,
                _download_dir: None,
            },
            None => match self.fetch_release(&config, &client, install_root).await? {
                Ok(source) => {
                    *phase = Phase::Update;
                    source
                }
                Err(check_result) => return Ok(check_result),
            },
        };

        let staging = install_root.join(STAGING_DIR_NAME);
        let outcome = self
            .apply_archive(&config, &client, install_root, &staging, &executable, &source)
            .await;

        if let Err(e) = remove_dir_all(&staging) {
            warn!("Failed to remove staging directory {}: {:#}", staging.display(), e);
        }

        let result = outcome?;
        if self.archive.is_some() && result.status == Status::Success {
            match std::fs::remove_file(&source.archive) {
                Ok(()) => info!("Removed applied archive {}", source.archive.display()),
                Err(e) => warn!("Failed to remove {}: {}", source.archive.display(), e),
            }
        }
        Ok(result)
    }

    /// Checks the latest release and downloads it when it is newer.
    ///
    /// `Err(result)` carries the final `check` result when there is nothing to
    /// install or only a check was requested.
    async fn fetch_release(
        &self,
        config: &UpdaterConfig,
        client: &ReleaseClient,
        install_root: &Path,
    ) -> Result<Result<UpdateSource, UpdateResult>> {
        let Some((owner, name)) = config.repository_parts()? else {
            return Err(UpkeepError::ConfigError {
                message: concat!(
                    "no update source: pass --archive or --repo, ",
                    "or set repository in updater.toml"
                )
                .to_string(),
            }
            .into());
        };

        let release = client.fetch_latest(owner, name).await?;
        let current = VersionMarker::new(install_root).read().await?;
        let check = UpdateCheck::new(current, release.tag_name.clone());

        let message = if check.update_available {
            format!("Update available: {} -> {}", check.current_version, check.latest_version)
        } else {
            format!("Already up to date ({})", check.current_version)
        };
        info!("{}", message);
        let check_result =
            UpdateResult::success(Phase::Check, message).with_version(Some(check.latest_version));

        if self.check_only || !check.update_available {
            return Ok(Err(check_result));
        }
        check_result.emit();

        let asset = release.select_asset()?;
        let download_dir = tempfile::Builder::new()
            .prefix("upkeep-download-")
            .tempdir()
            .context("Failed to create download directory")?;
        let file_name = Path::new(&asset.name)
            .file_name()
            .map_or_else(|| PathBuf::from("update.archive"), PathBuf::from);
        let archive = download_dir.path().join(file_name);
        client.download(&asset.browser_download_url, &archive).await?;

        Ok(Ok(UpdateSource {
            archive,
            version: Some(release.tag_name),
            _download_dir: Some(download_dir),
        }))
    }

    async fn apply_archive(
        &self,
        config: &UpdaterConfig,
        client: &ReleaseClient,
        install_root: &Path,
        staging: &Path,
        executable: &Path,
        source: &UpdateSource,
    ) -> Result<UpdateResult> {
        remove_dir_all(staging)?;
        let (archive, dest) = (source.archive.clone(), staging.to_path_buf());
        let extracted = tokio::task::spawn_blocking(move || extract_archive(&archive, &dest))
            .await
            .context("Extraction task panicked")??;
        info!(
            "Extracted {} files and {} directories from {} archive",
            extracted.files, extracted.directories, extracted.format
        );

        let self_updater = SelfUpdater::new(
            executable.to_path_buf(),
            install_root.to_path_buf(),
            staging.to_path_buf(),
        )
        .strategy(self.strategy());

        let pending_message = match self_updater.run().await? {
            SelfUpdateOutcome::NotNeeded => None,
            SelfUpdateOutcome::Applied => {
                Some("Updater replaced itself; relaunch it to finish the update".to_string())
            }
            SelfUpdateOutcome::Pending {
                staged_path,
            } => Some(format!(
                "New updater staged at {}; run `upkeep finalize` and relaunch to finish the update",
                staged_path.display()
            )),
        };
        if let Some(message) = pending_message {
            info!("{}", message);
            let result = UpdateResult::self_update_pending(message);
            return Ok(result.with_version(source.version.clone()));
        }

        if let Some(webhook) = &config.webhook {
            notify_shutdown(client.http(), webhook, SHUTDOWN_GRACE_PERIOD).await;
        }

        if let Some(target) =
            config.restart_cmd.as_deref().and_then(|cmd| command_program(cmd, install_root))
        {
            info!("Waiting for {} to be released", target.display());
            wait_for_unlock(&target, config.lock_timeout(), LOCK_POLL_INTERVAL).await?;
        }

        let mut rules = config.ignore_rules(self_updater.relative_path().as_deref())?;
        if let Some(relative) = install_relative(install_root, &source.archive) {
            // An archive kept inside the install tree is not part of the application
            rules = rules.with_literal(&relative);
        }
        let workers = effective_workers(config.diff_workers);
        let manifest = load_or_diff(install_root, staging, &rules, workers).await?;

        let changed = !manifest.is_empty();
        let message = if changed {
            let (root, stage, plan) =
                (install_root.to_path_buf(), staging.to_path_buf(), manifest.clone());
            let summary = tokio::task::spawn_blocking(move || apply_changes(&root, &stage, &plan))
                .await
                .context("Apply task panicked")??;
            format!(
                "Update applied: {} files installed, {} removed",
                summary.installed, summary.removed
            )
        } else {
            "Install already matches the update".to_string()
        };
        // Always replaced so `status` never reports an earlier run's changes
        manifest.save(install_root)?;
        info!("{}", message);

        if let Some(version) = &source.version {
            VersionMarker::new(install_root).write(version).await?;
        }

        if let Some(cmd) = &config.restart_cmd {
            info!("Restarting application: {}", cmd);
            if let Err(e) = spawn_detached_shell(cmd, install_root) {
                warn!("Failed to restart application: {:#}", e);
            }
        }

        Ok(UpdateResult::success(Phase::Update, message)
            .updated(changed)
            .with_version(source.version.clone()))
    }
}

/// `path` relative to `install_root`, when it lies inside it.
fn install_relative(install_root: &Path, path: &Path) -> Option<String> {
    let canonical = |p: &Path| std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf());
    relative_slash_path(&canonical(install_root), &canonical(path)).filter(|rel| !rel.is_empty())
}
