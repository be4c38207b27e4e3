//! Atomic file write operations using temp-and-rename strategy.
//!
//! The temporary file is always created in the destination's own directory so
//! the final rename never crosses a filesystem boundary. Readers of the final
//! path therefore see either the previous content or the complete new content,
//! never a truncated file.

use crate::utils::fs::dirs::ensure_dir;
use anyhow::{Context, Result};
use std::fs::{self, Permissions};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// 1. Creates a uniquely named temporary file beside `path`
/// 2. Writes and syncs the content
/// 3. Renames the temporary file over `path`
///
/// Parent directories are created when missing.
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::utils::fs::atomic_write;
/// use std::path::Path;
///
/// # fn example() -> anyhow::Result<()> {
/// atomic_write(Path::new("version.txt"), b"v1.4.0\n")?;
/// # Ok(())
/// # }
/// ```
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let mut temp = temp_file_beside(path)?;

    temp.write_all(content)
        .with_context(|| format!("Failed to write temp file for: {}", path.display()))?;
    temp.as_file().sync_all().with_context(|| "Failed to sync file to disk")?;

    temp.persist(path)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;

    Ok(())
}

/// Atomically replaces `dst` with a copy of `src`.
///
/// The copy carries `permissions` when given, otherwise the permissions of `src`.
/// `dst` is untouched unless the whole copy succeeded.
pub fn atomic_copy(src: &Path, dst: &Path, permissions: Option<Permissions>) -> Result<()> {
    let mut reader = fs::File::open(src)
        .with_context(|| format!("Failed to open source file: {}", src.display()))?;
    let permissions = match permissions {
        Some(permissions) => permissions,
        None => reader
            .metadata()
            .with_context(|| format!("Failed to read metadata: {}", src.display()))?
            .permissions(),
    };

    let mut temp = temp_file_beside(dst)?;
    io::copy(&mut reader, &mut temp).with_context(|| {
        format!("Failed to copy {} to temp file beside {}", src.display(), dst.display())
    })?;
    temp.as_file().sync_all().with_context(|| "Failed to sync file to disk")?;
    temp.as_file()
        .set_permissions(permissions)
        .with_context(|| format!("Failed to set permissions for: {}", dst.display()))?;

    temp.persist(dst)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to rename temp file to: {}", dst.display()))?;

    Ok(())
}

fn temp_file_beside(path: &Path) -> Result<NamedTempFile> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    ensure_dir(parent)?;

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    tempfile::Builder::new()
        .prefix(&format!(".{file_name}."))
        .suffix(".tmp")
        .tempfile_in(parent)
        .with_context(|| format!("Failed to create temp file in: {}", parent.display()))
}
