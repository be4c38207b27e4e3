//! Release discovery and download.
//!
//! Releases are resolved through the GitHub REST API:
//!
//! ```text
//! GET {api_base}/repos/{owner}/{name}/releases/latest
//! { "tag_name": "v1.4.0",
//!   "assets": [ { "name": "app-linux-x64.tar.gz", "browser_download_url": "https://..." } ] }
//! ```
//!
//! The asset for this machine is the one whose name ends in
//! `-{platform}-{arch}.{ext}`, where `platform` and `arch` come from
//! [`platform_ids`] and [`arch_ids`] and `ext` is an archive extension the
//! extractor supports.

pub mod client;
pub mod notify;

pub use client::ReleaseClient;
pub use notify::notify_shutdown;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::archive::strip_supported_extension;
use crate::core::UpkeepError;
use crate::utils::platform::{arch_ids, platform_ids};

/// One downloadable file attached to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

/// The subset of a GitHub release the updater needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

impl ReleaseDescriptor {
    /// Picks the asset built for the running platform and architecture.
    ///
    /// # Errors
    ///
    /// [`UpkeepError::NoMatchingAsset`] when no asset matches.
    pub fn select_asset(&self) -> Result<&Asset> {
        self.select_asset_for(&platform_ids(), &arch_ids())
    }

    /// Picks the first asset matching any `platforms` x `archs` pair, in the
    /// preference order of both lists.
    pub fn select_asset_for(&self, platforms: &[&str], archs: &[&str]) -> Result<&Asset> {
        for platform in platforms {
            for arch in archs {
                let suffix = format!("-{platform}-{arch}");
                let found = self.assets.iter().find(|asset| {
                    strip_supported_extension(&asset.name)
                        .is_some_and(|stem| stem.to_ascii_lowercase().ends_with(&suffix))
                });
                if let Some(asset) = found {
                    return Ok(asset);
                }
            }
        }

        Err(UpkeepError::NoMatchingAsset {
            tag: self.tag_name.clone(),
            platform: platforms.first().copied().unwrap_or(std::env::consts::OS).to_string(),
            arch: archs.first().copied().unwrap_or(std::env::consts::ARCH).to_string(),
        }
        .into())
    }
}

/// URL of the latest-release endpoint for `owner/name`.
#[must_use]
pub fn latest_release_url(api_base: &str, owner: &str, name: &str) -> String {
    format!("{}/repos/{owner}/{name}/releases/latest", api_base.trim_end_matches('/'))
}
