//! Human-readable report of the install's update state.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CommandContext;
use crate::apply::Journal;
use crate::changes::ChangeManifest;
use crate::config::UpdaterConfig;
use crate::upgrade::{VersionMarker, staged_path_for};

/// Command to show the installed version and any unfinished update.
#[derive(Args, Debug)]
pub struct StatusCommand {
    /// Executable whose pending self-update is reported (default: this updater)
    #[arg(long, value_name = "PATH")]
    exe: Option<PathBuf>,
}

impl StatusCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let install_root = &ctx.install_root;
        let executable = match self.exe {
            Some(path) => path,
            None => std::env::current_exe().context("Failed to locate the running executable")?,
        };

        println!("{:<20} {}", "Install directory:".bold(), install_root.display());

        let version = VersionMarker::new(install_root).read().await?;
        println!("{:<20} {}", "Installed version:".bold(), version.cyan());

        let config_path =
            ctx.config_path.clone().unwrap_or_else(|| UpdaterConfig::default_path(install_root));
        let config_state = if config_path.exists() {
            config_path.display().to_string().normal()
        } else {
            format!("{} (not found, using defaults)", config_path.display()).dimmed()
        };
        println!("{:<20} {}", "Configuration:".bold(), config_state);

        match ChangeManifest::load(install_root) {
            Ok(Some(manifest)) => println!(
                "{:<20} {} added, {} modified, {} deleted",
                "Last update:".bold(),
                manifest.added.len(),
                manifest.modified.len(),
                manifest.deleted.len()
            ),
            Ok(None) => println!("{:<20} {}", "Last update:".bold(), "none recorded".dimmed()),
            Err(e) => {
                println!("{:<20} {}", "Last update:".bold(), format!("unreadable ({e})").yellow());
            }
        }

        let staged = staged_path_for(&executable);
        if staged.is_file() {
            println!(
                "{:<20} {} {}",
                "Pending updater:".bold(),
                staged.display().to_string().yellow(),
                "(run `upkeep finalize`)".dimmed()
            );
        } else {
            println!("{:<20} {}", "Pending updater:".bold(), "none".green());
        }

        match Journal::read(install_root) {
            Ok(None) => println!("{:<20} {}", "Interrupted update:".bold(), "none".green()),
            Ok(Some(journal)) => println!(
                "{:<20} {} {}",
                "Interrupted update:".bold(),
                format!("originals in {}", journal.backup_dir).red().bold(),
                format!("(started {})", journal.started_at.to_rfc3339()).dimmed()
            ),
            Err(e) => println!(
                "{:<20} {}",
                "Interrupted update:".bold(),
                format!("journal unreadable: {e}").red().bold()
            ),
        }

        Ok(())
    }
}
