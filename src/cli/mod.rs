//! Command-line interface for upkeep.
//!
//! # Commands
//!
//! - `update` - Apply an archive or the latest release to the install directory
//! - `status` - Show the installed version and any unfinished update
//! - `finalize` - Swap in an updater staged by a deferred self-update
//!
//! # Global Options
//!
//! - `--install-dir <DIR>` - Install directory (default: current directory)
//! - `--config <PATH>` - Updater configuration (default: `config/updater.toml`)
//! - `--verbose` / `-v` - Log debug detail to `updater.log`
//! - `--quiet` / `-q` - Disable logging
//! - `--no-progress` - Hide download progress bars
//!
//! # Output
//!
//! `update` prints one JSON object per phase on stdout and nothing else, so a
//! launcher can parse it. Logs go to `updater.log` in the install directory;
//! progress bars and human-readable errors go to stderr.
//!
//! # Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0    | Success (including "already up to date") |
//! | 10   | The updater replaced or staged itself; relaunch it |
//! | 1    | Failure |

mod finalize;
pub mod output;
mod status;
mod update;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;

use crate::constants::LOG_FILE;

/// Settings shared by every command, resolved from the global flags.
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Absolute install directory.
    pub install_root: PathBuf,
    /// Explicit configuration file, if one was given.
    pub config_path: Option<PathBuf>,
    /// Whether progress bars may be drawn.
    pub show_progress: bool,
}

/// Main CLI structure for upkeep.
#[derive(Parser, Debug)]
#[command(
    name = "upkeep",
    about = "Self-updating deployment engine for locally installed applications",
    version,
    long_about = "upkeep extracts an update archive, diffs it against the install directory, \
                  applies the changes transactionally with rollback, and replaces its own \
                  executable when the update ships a new one."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Install directory to update (default: current directory)
    #[arg(long, global = true, value_name = "DIR", env = "UPKEEP_INSTALL_DIR")]
    install_dir: Option<PathBuf>,

    /// Path to updater.toml (default: <install-dir>/config/updater.toml)
    #[arg(long, global = true, value_name = "PATH", env = "UPKEEP_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug detail
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable logging
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Hide progress bars
    #[arg(long, global = true, env = "UPKEEP_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply an update archive or the latest release
    Update(update::UpdateCommand),

    /// Show the installed version and any unfinished update
    Status(status::StatusCommand),

    /// Move a staged updater executable into place
    Finalize(finalize::FinalizeCommand),
}

impl Cli {
    /// The absolute install directory.
    ///
    /// # Errors
    ///
    /// Fails when the directory does not exist.
    pub fn install_root(&self) -> Result<PathBuf> {
        let dir = match &self.install_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("Failed to read the current directory")?,
        };
        std::fs::canonicalize(&dir)
            .with_context(|| format!("Install directory not found: {}", dir.display()))
    }

    /// Filter directive for the log file, `None` when logging is off.
    #[must_use]
    pub fn log_directive(&self) -> Option<&'static str> {
        if self.quiet {
            None
        } else if self.verbose {
            Some("debug")
        } else {
            Some("info")
        }
    }

    /// Sends `tracing` output to `updater.log` in `install_root`.
    ///
    /// `RUST_LOG` overrides the default `info` level but not `--verbose`. The
    /// returned guard flushes buffered lines when dropped and must be held until
    /// the process exits.
    pub fn init_logging(&self, install_root: &Path) -> Result<Option<WorkerGuard>> {
        let Some(directive) = self.log_directive() else {
            return Ok(None);
        };

        let filter = if self.verbose {
            EnvFilter::new(directive)
        } else {
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive))
        };

        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(LOG_FILE)
            .build(install_root)
            .with_context(|| format!("Failed to open {LOG_FILE} in {}", install_root.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(appender);

        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .with_target(true)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to install log subscriber: {e}"))?;

        Ok(Some(guard))
    }

    fn context(&self, install_root: PathBuf) -> CommandContext {
        CommandContext {
            install_root,
            config_path: self.config.clone(),
            show_progress: !self.no_progress && !self.quiet,
        }
    }

    /// Runs the selected command and returns the process exit code.
    ///
    /// `update` reports its own failures as JSON and never returns `Err`; the
    /// other commands propagate errors for the caller to display.
    pub async fn execute(self, install_root: PathBuf) -> Result<i32> {
        let ctx = self.context(install_root);
        match self.command {
            Commands::Update(cmd) => Ok(cmd.execute(&ctx).await),
            Commands::Status(cmd) => cmd.execute(&ctx).await.map(|()| 0),
            Commands::Finalize(cmd) => cmd.execute(&ctx).await.map(|()| 0),
        }
    }
}
