//! Path utilities for install-relative paths.
//!
//! Every path that crosses a component boundary (archive entry names, change
//! manifest entries, backup keys) is an install-relative, slash-separated string.
//! This module converts between those strings and filesystem paths and performs the
//! lexical traversal check that keeps them inside their root.

use anyhow::{Result, anyhow};
use std::path::{Component, Path, PathBuf};

/// Resolves an untrusted relative name lexically.
///
/// Backslashes are treated as separators, `.` and empty segments are dropped and
/// `..` pops the previous segment. Returns `None` when the name is absolute, has a
/// drive prefix, contains a NUL byte, or climbs above the root. A name that
/// resolves to the root itself yields `Some("")`.
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::utils::fs::resolve_relative;
///
/// assert_eq!(resolve_relative("bin\\app.exe").as_deref(), Some("bin/app.exe"));
/// assert_eq!(resolve_relative("a/./b/../c").as_deref(), Some("a/c"));
/// assert_eq!(resolve_relative("../etc/passwd"), None);
/// assert_eq!(resolve_relative("/etc/passwd"), None);
/// ```
#[must_use]
pub fn resolve_relative(name: &str) -> Option<String> {
    if name.contains('\0') {
        return None;
    }

    let normalized = name.replace('\\', "/");
    if normalized.starts_with('/') || has_drive_prefix(&normalized) {
        return None;
    }

    let mut segments: Vec<&str> = Vec::new();
    for segment in normalized.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }

    Some(segments.join("/"))
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Joins a validated relative name onto `root`.
///
/// # Errors
///
/// Fails when the name escapes `root` or resolves to `root` itself.
pub fn join_relative(root: &Path, name: &str) -> Result<PathBuf> {
    let relative = resolve_relative(name)
        .filter(|rel| !rel.is_empty())
        .ok_or_else(|| anyhow!("Path escapes its root directory: {name}"))?;

    let mut joined = root.to_path_buf();
    for segment in relative.split('/') {
        joined.push(segment);
    }
    Ok(joined)
}

/// Slash-separated path of `path` relative to `root`, or `None` if `path` is not under it.
#[must_use]
pub fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut segments = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => segments.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(segments.join("/"))
}

/// Parent of a slash-separated relative path, `None` at top level.
#[must_use]
pub fn relative_parent(relative: &str) -> Option<&str> {
    relative.rfind('/').map(|idx| &relative[..idx])
}
