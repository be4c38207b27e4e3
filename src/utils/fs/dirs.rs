//! Directory operations and file moves.
//!
//! Moves are how the updater keeps an undo record: an original file is renamed
//! into the backup directory instead of being deleted, and renamed back on rollback.

use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Creates a directory and all of its parents if missing.
///
/// # Errors
///
/// Fails when the path exists but is not a directory or cannot be created.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        fs::create_dir_all(path).with_context(|| {
            let platform_help = if crate::utils::platform::is_windows() {
                concat!(
                    "On Windows: Check that the path length is < 260 chars ",
                    "or that long path support is enabled"
                )
            } else {
                "Check directory permissions and path validity"
            };

            format!("Failed to create directory: {}\n\n{}", path.display(), platform_help)
        })?;
    } else if !path.is_dir() {
        return Err(anyhow::anyhow!("Path exists but is not a directory: {}", path.display()));
    }
    Ok(())
}

/// Moves a file, creating the destination's parent directories.
///
/// Uses a rename. When the rename crosses devices the file is copied and the source
/// removed afterwards, so the source is only gone once the copy is complete.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        ensure_dir(parent)?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("Cross-device move of {}, copying instead", src.display());
            fs::copy(src, dst).with_context(|| {
                format!("Failed to copy {} to {}", src.display(), dst.display())
            })?;
            fs::remove_file(src)
                .with_context(|| format!("Failed to remove moved file: {}", src.display()))?;
            Ok(())
        }
        Err(e) => Err(e)
            .with_context(|| format!("Failed to move {} to {}", src.display(), dst.display())),
    }
}

fn is_cross_device(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::CrossesDevices
}

/// Removes `dir` if it exists and is empty. Returns whether it was removed.
pub fn remove_dir_if_empty(dir: &Path) -> Result<bool> {
    let mut entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read directory: {}", dir.display()));
        }
    };

    if entries.next().is_some() {
        return Ok(false);
    }

    fs::remove_dir(dir)
        .with_context(|| format!("Failed to remove empty directory: {}", dir.display()))?;
    Ok(true)
}

/// Removes a directory tree, treating a missing directory as success.
pub fn remove_dir_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => {
            Err(e).with_context(|| format!("Failed to remove directory: {}", path.display()))
        }
    }
}
