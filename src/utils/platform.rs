//! Platform-specific utilities and cross-platform compatibility helpers
//!
//! This module encapsulates the platform differences the updater depends on:
//!
//! - Release asset naming (`win`/`osx`/`linux`, `x64`/`arm64`)
//! - Whether a running executable may be renamed while it executes
//! - How a detached restart command is spawned
//!
//! # Examples
//!
//! ```rust,no_run
//! use upkeep_cli::utils::platform::{arch_ids, can_replace_running_executable, platform_ids};
//!
//! println!("asset platforms: {:?}, archs: {:?}", platform_ids(), arch_ids());
//! if can_replace_running_executable() {
//!     println!("self-update is applied immediately");
//! }
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Checks if the current platform is Windows.
#[must_use]
pub const fn is_windows() -> bool {
    cfg!(windows)
}

/// Whether the OS lets a running executable's path be repointed.
///
/// Unix keeps the inode of an executing binary alive after it is renamed or
/// unlinked, so the file at the path can be swapped underneath the process.
/// Windows refuses to modify an image that is mapped for execution.
#[must_use]
pub const fn can_replace_running_executable() -> bool {
    cfg!(unix)
}

/// Platform names accepted in release asset file names, most specific alias first.
///
/// The raw [`std::env::consts::OS`] value is always included last.
#[must_use]
pub fn platform_ids() -> Vec<&'static str> {
    platform_ids_for(std::env::consts::OS)
}

/// Architecture names accepted in release asset file names.
///
/// The raw [`std::env::consts::ARCH`] value is always included last.
#[must_use]
pub fn arch_ids() -> Vec<&'static str> {
    arch_ids_for(std::env::consts::ARCH)
}

pub(crate) fn platform_ids_for(os: &'static str) -> Vec<&'static str> {
    let alias = match os {
        "windows" => Some("win"),
        "macos" => Some("osx"),
        "linux" => Some("linux"),
        _ => None,
    };
    dedup_ids(alias, os)
}

pub(crate) fn arch_ids_for(arch: &'static str) -> Vec<&'static str> {
    let alias = match arch {
        "x86_64" => Some("x64"),
        "aarch64" => Some("arm64"),
        _ => None,
    };
    dedup_ids(alias, arch)
}

fn dedup_ids(alias: Option<&'static str>, raw: &'static str) -> Vec<&'static str> {
    match alias {
        Some(alias) if alias != raw => vec![alias, raw],
        _ => vec![raw],
    }
}

/// Spawns `command` through the platform shell, detached from the updater.
///
/// The updater does not wait for the child: it exits right after restarting the
/// application. The command runs in `working_dir`.
pub fn spawn_detached_shell(command: &str, working_dir: &Path) -> Result<()> {
    let mut cmd = if is_windows() {
        let mut cmd = Command::new("cmd");
        cmd.args(["/c", "start", "/b", "cmd", "/c", command]);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(format!("{command} &"));
        cmd
    };

    cmd.current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn restart command: {command}"))?;
    Ok(())
}

/// The program a shell command line starts, resolved against `working_dir`.
///
/// Only the first word is taken; surrounding double quotes are removed so
/// `"C:\\Program Files\\app.exe" --flag` resolves to the quoted path.
#[must_use]
pub fn command_program(command: &str, working_dir: &Path) -> Option<PathBuf> {
    let command = command.trim();
    let program = if let Some(quoted) = command.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        command.split_whitespace().next()?
    };
    if program.is_empty() {
        return None;
    }

    let path = Path::new(program);
    Some(if path.is_absolute() { path.to_path_buf() } else { working_dir.join(path) })
}
