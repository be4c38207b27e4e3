//! Change manifests: what differs between the staging tree and the install tree.
//!
//! A [`ChangeManifest`] classifies install-relative paths into `added`, `deleted`
//! and `modified`. It is either computed by [`diff_trees`] or shipped inside the
//! update package as `changes.json` and loaded by [`load_or_diff`].
//!
//! # Format
//!
//! ```json
//! {
//!   "added": ["plugins/new.dll"],
//!   "deleted": ["legacy/old.dll"],
//!   "modified": ["app.dll"]
//! }
//! ```
//!
//! Missing arrays are treated as empty. Paths use `/` separators; `\` is
//! accepted on input and normalized.
//!
//! # Invariants
//!
//! After [`ChangeManifest::normalize`] every list is sorted and free of
//! duplicates, and the three lists are pairwise disjoint. Serialization always
//! goes through normalization, so two manifests describing the same changes
//! serialize to identical bytes.

pub mod differ;
pub mod ignore;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::CHANGES_FILE;
use crate::core::UpkeepError;
use crate::utils::fs::{atomic_write, resolve_relative};

pub use differ::{FileEntry, diff_trees, effective_workers, load_or_diff};
pub use ignore::IgnoreRules;

/// Classification of install-relative paths between two trees.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeManifest {
    /// Present only in the staging tree.
    #[serde(default)]
    pub added: Vec<String>,
    /// Present only in the install tree.
    #[serde(default)]
    pub deleted: Vec<String>,
    /// Present in both with different content.
    #[serde(default)]
    pub modified: Vec<String>,
}

impl ChangeManifest {
    /// Whether nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Total number of paths across all three lists.
    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.deleted.len() + self.modified.len()
    }

    /// Sorts and deduplicates every list in place.
    pub fn sort(&mut self) {
        for list in [&mut self.added, &mut self.deleted, &mut self.modified] {
            list.sort();
            list.dedup();
        }
    }

    /// Normalizes separators, resolves `.`/`..` lexically, sorts and deduplicates.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::InvalidManifest`] when an entry is empty or escapes the root.
    pub fn normalize(&mut self) -> Result<()> {
        for list in [&mut self.added, &mut self.deleted, &mut self.modified] {
            for entry in list.iter_mut() {
                let resolved = resolve_relative(entry).filter(|r| !r.is_empty()).ok_or_else(|| {
                    UpkeepError::InvalidManifest {
                        reason: format!(
                            "entry '{entry}' is not a path inside the install directory"
                        ),
                    }
                })?;
                *entry = resolved;
            }
        }
        self.sort();
        Ok(())
    }

    /// Checks that no path appears in more than one list.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::InvalidManifest`] naming the first overlapping path.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for (name, list) in
            [("added", &self.added), ("deleted", &self.deleted), ("modified", &self.modified)]
        {
            let unique: BTreeSet<&String> = list.iter().collect();
            for path in unique {
                if !seen.insert(path) {
                    return Err(UpkeepError::InvalidManifest {
                        reason: format!("'{path}' is listed in '{name}' and another list"),
                    }
                    .into());
                }
            }
        }
        Ok(())
    }

    /// Drops every path matched by `rules`.
    pub fn retain_tracked(&mut self, rules: &IgnoreRules) {
        for list in [&mut self.added, &mut self.deleted, &mut self.modified] {
            list.retain(|path| {
                let keep = !rules.is_ignored(path);
                if !keep {
                    debug!("Dropping ignored manifest entry: {}", path);
                }
                keep
            });
        }
    }

    /// Parses a manifest, validating and normalizing it.
    ///
    /// `origin` names the source in error messages.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::ManifestParse`] for malformed JSON, [`UpkeepError::InvalidManifest`]
    /// for escaping or overlapping entries.
    pub fn from_json(json: &str, origin: &str) -> Result<Self> {
        let mut manifest: Self =
            serde_json::from_str(json).map_err(|e| UpkeepError::ManifestParse {
                file: origin.to_string(),
                reason: e.to_string(),
            })?;
        manifest.normalize()?;
        manifest.validate()?;
        Ok(manifest)
    }

    /// Serializes the manifest as pretty JSON, sorted.
    pub fn to_json(&self) -> Result<String> {
        let mut sorted = self.clone();
        sorted.sort();
        let mut json = serde_json::to_string_pretty(&sorted)
            .context("Failed to serialize change manifest")?;
        json.push('\n');
        Ok(json)
    }

    /// Reads `changes.json` from `dir`, or `None` when there is none.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = dir.join(CHANGES_FILE);
        let json = match std::fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read change manifest: {}", path.display()));
            }
        };
        Self::from_json(&json, &path.display().to_string()).map(Some)
    }

    /// Atomically writes `changes.json` into `dir`. Returns the written path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CHANGES_FILE);
        atomic_write(&path, self.to_json()?.as_bytes())
            .with_context(|| format!("Failed to write change manifest: {}", path.display()))?;
        Ok(path)
    }
}
