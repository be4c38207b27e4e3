//! Archive extraction into the staging directory.
//!
//! Extraction runs in two passes over the archive:
//!
//! 1. **Plan**: every entry header is read, its name resolved against the
//!    destination and its type checked. Nothing is written.
//! 2. **Write**: the planned entries are materialized in archive order.
//!
//! A traversal attempt or unsupported entry type anywhere in the archive
//! therefore fails the call before the first byte reaches the disk. A failure
//! during the write pass (corrupt data, disk full) removes everything the call
//! wrote, so callers never see a partially extracted tree.
//!
//! # Supported formats
//!
//! | Format | Detection |
//! |--------|-----------|
//! | ZIP    | `PK` local header or end-of-directory magic, `.zip` |
//! | TAR    | `ustar` magic at offset 257, `.tar` |
//! | TAR.GZ | gzip magic `1F 8B`, `.tar.gz`, `.tgz` |
//!
//! # Examples
//!
//! ```rust,no_run
//! use upkeep_cli::archive::extract_archive;
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let summary = extract_archive(Path::new("update.zip"), Path::new("update_temp"))?;
//! println!("{} files, {} directories", summary.files, summary.directories);
//! # Ok(())
//! # }
//! ```

pub mod detect;
mod tarball;
mod zipfile;

use anyhow::{Context, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::core::UpkeepError;
use crate::utils::fs::{remove_dir_all, remove_dir_if_empty, resolve_relative};

pub use detect::{ArchiveFormat, detect_format, strip_supported_extension};

/// What an extraction wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractSummary {
    pub format: ArchiveFormat,
    pub files: usize,
    pub directories: usize,
}

/// Type of a validated entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryKind {
    Directory,
    File { mode: Option<u32> },
}

/// An entry that passed validation, addressed by its position in the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlannedEntry {
    pub index: usize,
    pub relative: String,
    pub kind: EntryKind,
}

/// Validates one entry name. Entries naming the root itself yield `None`.
pub(crate) fn plan_entry(
    index: usize,
    name: &str,
    kind: EntryKind,
) -> Result<Option<PlannedEntry>> {
    let relative = resolve_relative(name).ok_or_else(|| UpkeepError::PathTraversal {
        entry: name.to_string(),
    })?;

    if relative.is_empty() {
        debug!("Skipping root entry '{}'", name);
        return Ok(None);
    }

    Ok(Some(PlannedEntry {
        index,
        relative,
        kind,
    }))
}

pub(crate) fn corrupt(archive: &Path, reason: impl std::fmt::Display) -> UpkeepError {
    UpkeepError::ArchiveCorrupt {
        path: archive.display().to_string(),
        reason: reason.to_string(),
    }
}

/// Writes planned entries below the destination and remembers what it created.
pub(crate) struct EntryWriter {
    dest: PathBuf,
    created_dirs: Vec<PathBuf>,
    written_files: Vec<PathBuf>,
    files: usize,
    directories: usize,
}

impl EntryWriter {
    fn new(dest: &Path) -> Self {
        Self {
            dest: dest.to_path_buf(),
            created_dirs: Vec::new(),
            written_files: Vec::new(),
            files: 0,
            directories: 0,
        }
    }

    /// Creates every missing directory from the destination down to `relative`.
    fn create_dirs(&mut self, relative: &str) -> Result<PathBuf> {
        let mut current = self.dest.clone();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            current.push(segment);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.file_type().is_symlink() => {
                    return Err(UpkeepError::PathTraversal {
                        entry: relative.to_string(),
                    }
                    .into());
                }
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => {
                    anyhow::bail!("Cannot create directory over a file: {}", current.display());
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    fs::create_dir(&current).with_context(|| {
                        format!("Failed to create directory: {}", current.display())
                    })?;
                    self.created_dirs.push(current.clone());
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to inspect: {}", current.display()));
                }
            }
        }
        Ok(current)
    }

    pub(crate) fn directory(&mut self, relative: &str) -> Result<()> {
        self.create_dirs(relative)?;
        self.directories += 1;
        Ok(())
    }

    pub(crate) fn file(
        &mut self,
        relative: &str,
        mode: Option<u32>,
        reader: &mut dyn Read,
    ) -> Result<()> {
        let (parent, name) = match relative.rsplit_once('/') {
            Some((parent, name)) => (parent, name),
            None => ("", relative),
        };
        let target = self.create_dirs(parent)?.join(name);

        if fs::symlink_metadata(&target).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Err(UpkeepError::PathTraversal {
                entry: relative.to_string(),
            }
            .into());
        }

        let mut out = File::create(&target)
            .with_context(|| format!("Failed to create file: {}", target.display()))?;
        self.written_files.push(target.clone());
        io::copy(reader, &mut out)
            .with_context(|| format!("Failed to extract entry: {relative}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = mode.map(|m| m & 0o777) {
                out.set_permissions(fs::Permissions::from_mode(mode)).with_context(|| {
                    format!("Failed to set permissions for: {}", target.display())
                })?;
            }
        }
        #[cfg(not(unix))]
        let _ = mode;

        self.files += 1;
        Ok(())
    }

    /// Removes the files and directories this writer created.
    fn undo(self) {
        for file in self.written_files.iter().rev() {
            if let Err(e) = fs::remove_file(file)
                && e.kind() != io::ErrorKind::NotFound
            {
                warn!("Failed to remove partially extracted {}: {}", file.display(), e);
            }
        }
        for dir in self.created_dirs.iter().rev() {
            if let Err(e) = remove_dir_if_empty(dir) {
                warn!("Failed to remove {}: {:#}", dir.display(), e);
            }
        }
    }
}

/// Extracts `archive` into `dest`, creating `dest` if absent.
///
/// # Errors
///
/// - [`UpkeepError::UnsupportedArchiveFormat`] before anything is read past the header
/// - [`UpkeepError::PathTraversal`] or [`UpkeepError::UnsupportedEntryType`] from the plan pass
/// - [`UpkeepError::ArchiveCorrupt`] or I/O errors from either pass
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<ExtractSummary> {
    let format = detect_format(archive)?;
    info!("Extracting {} archive {} into {}", format, archive.display(), dest.display());

    let plan = match format {
        ArchiveFormat::Zip => zipfile::plan(archive)?,
        ArchiveFormat::Tar => tarball::plan(archive, false)?,
        ArchiveFormat::TarGz => tarball::plan(archive, true)?,
    };
    debug!("Planned {} entries", plan.len());

    let created_dest = !dest.exists();
    fs::create_dir_all(dest)
        .with_context(|| format!("Failed to create extraction directory: {}", dest.display()))?;

    let mut writer = EntryWriter::new(dest);
    let written = match format {
        ArchiveFormat::Zip => zipfile::write(archive, &plan, &mut writer),
        ArchiveFormat::Tar => tarball::write(archive, false, &plan, &mut writer),
        ArchiveFormat::TarGz => tarball::write(archive, true, &plan, &mut writer),
    };

    if let Err(e) = written {
        warn!("Extraction failed, removing partial output: {:#}", e);
        if created_dest {
            if let Err(cleanup) = remove_dir_all(dest) {
                warn!("{:#}", cleanup);
            }
        } else {
            writer.undo();
        }
        return Err(e.context(format!("Failed to extract {}", archive.display())));
    }

    let summary = ExtractSummary {
        format,
        files: writer.files,
        directories: writer.directories,
    };
    info!("Extracted {} files and {} directories", summary.files, summary.directories);
    Ok(summary)
}
