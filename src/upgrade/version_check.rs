use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::constants::VERSION_FILE;
use crate::utils::fs::atomic_write;

/// Version reported when the install has no usable version marker.
pub const VERSION_ZERO: &str = "0.0.0";

/// The installed version, as recorded in the install root's `version.txt`.
///
/// Only the first line of the file is significant. A missing, empty or blank
/// file means version zero.
///
/// # Examples
///
/// ```rust,no_run
/// use upkeep_cli::upgrade::version_check::VersionMarker;
/// use std::path::Path;
///
/// # async fn example() -> anyhow::Result<()> {
/// let marker = VersionMarker::new(Path::new("."));
/// println!("installed: {}", marker.read().await?);
/// marker.write("v1.5.0").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VersionMarker {
    path: PathBuf,
}

impl VersionMarker {
    #[must_use]
    pub fn new(install_root: &Path) -> Self {
        Self {
            path: install_root.join(VERSION_FILE),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The installed version string, [`VERSION_ZERO`] when unknown.
    pub async fn read(&self) -> Result<String> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No version marker at {}", self.path.display());
                return Ok(VERSION_ZERO.to_string());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read {}", self.path.display()));
            }
        };

        let version = content.lines().next().map(str::trim).unwrap_or_default();
        if version.is_empty() {
            Ok(VERSION_ZERO.to_string())
        } else {
            Ok(version.to_string())
        }
    }

    /// Records `version` as installed.
    pub async fn write(&self, version: &str) -> Result<()> {
        let path = self.path.clone();
        let content = format!("{}\n", version.trim());
        tokio::task::spawn_blocking(move || atomic_write(&path, content.as_bytes()))
            .await
            .context("Version marker write task panicked")?
    }
}

fn parse_version(raw: &str) -> Option<semver::Version> {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
    semver::Version::parse(trimmed).ok()
}

/// Whether `latest` should replace `current`.
///
/// Both parse as semver (an optional leading `v` is ignored): `latest > current`.
/// Otherwise the tags are compared as strings and any difference counts as newer.
#[must_use]
pub fn is_newer(current: &str, latest: &str) -> bool {
    match (parse_version(current), parse_version(latest)) {
        (Some(current), Some(latest)) => latest > current,
        _ => current.trim() != latest.trim(),
    }
}

/// Outcome of comparing the installed version with the latest release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub current_version: String,
    pub latest_version: String,
    pub update_available: bool,
}

impl UpdateCheck {
    #[must_use]
    pub fn new(current_version: String, latest_version: String) -> Self {
        let update_available = is_newer(&current_version, &latest_version);
        Self {
            current_version,
            latest_version,
            update_available,
        }
    }
}
