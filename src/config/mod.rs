//! Updater configuration.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. Built-in defaults
//! 2. `config/updater.toml` in the install root, or the file passed with `--config`
//! 3. Command-line flags and their `UPKEEP_*` environment variables
//!
//! # File format
//!
//! ```toml
//! repository = "acme/widget"
//! proxy = "http://proxy.internal:3128"
//! webhook = "http://127.0.0.1:8080/shutdown"
//! restart_cmd = "./widget --minimized"
//! max_retries = 5
//! download_timeout_secs = 900
//! extra_ignore = ["saves/**", "*.bak"]
//! ```
//!
//! Every key is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use crate::changes::IgnoreRules;
use crate::constants::{
    CONFIG_DIR, CONFIG_FILE, DEFAULT_API_BASE, DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MAX_RETRIES,
    LOCK_WAIT_TIMEOUT, PREVIOUS_EXE_SUFFIX, STAGED_EXE_SUFFIX,
};
use crate::core::UpkeepError;

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

const fn default_max_retries() -> usize {
    DEFAULT_MAX_RETRIES
}

const fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

const fn default_lock_timeout_secs() -> u64 {
    LOCK_WAIT_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdaterConfig {
    /// GitHub repository releases are fetched from, as `owner/name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Base URL of the GitHub REST API.
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Proxy for all outbound requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Endpoint asked to shut the application down before files are replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<String>,

    /// Command that starts the application again after the update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_cmd: Option<String>,

    /// Download attempts after the first failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Overall deadline for a download, retries included.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// How long to wait for the application to release its files.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Fingerprint worker count; derived from the CPU count when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_workers: Option<usize>,

    /// Additional ignore globs on top of the built-in ones.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_ignore: Vec<String>,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            repository: None,
            api_base: default_api_base(),
            proxy: None,
            webhook: None,
            restart_cmd: None,
            max_retries: default_max_retries(),
            download_timeout_secs: default_download_timeout_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            diff_workers: None,
            extra_ignore: Vec::new(),
        }
    }
}

/// Values given on the command line. `None` keeps the file's value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub repository: Option<String>,
    pub proxy: Option<String>,
    pub webhook: Option<String>,
    pub restart_cmd: Option<String>,
    pub diff_workers: Option<usize>,
}

impl UpdaterConfig {
    /// Default location below an install root.
    #[must_use]
    pub fn default_path(install_root: &Path) -> PathBuf {
        install_root.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Loads `explicit` if given (it must exist), else the default file if present.
    pub async fn load(install_root: &Path, explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path).await;
        }

        let path = Self::default_path(install_root);
        if path.exists() {
            Self::load_from(&path).await
        } else {
            debug!("No configuration at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read updater config from {}", path.display()))?;

        let config: Self = toml::from_str(&content).map_err(|e| UpkeepError::ConfigError {
            message: format!("{}: {}", path.display(), e.message()),
        })?;
        config.validate()?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Applies command-line values on top of this configuration.
    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if overrides.repository.is_some() {
            self.repository = overrides.repository;
        }
        if overrides.proxy.is_some() {
            self.proxy = overrides.proxy;
        }
        if overrides.webhook.is_some() {
            self.webhook = overrides.webhook;
        }
        if overrides.restart_cmd.is_some() {
            self.restart_cmd = overrides.restart_cmd;
        }
        if overrides.diff_workers.is_some() {
            self.diff_workers = overrides.diff_workers;
        }
        self
    }

    /// Checks values that deserialize fine but cannot work.
    pub fn validate(&self) -> Result<()> {
        if let Some(repository) = &self.repository {
            self.repository_parts_of(repository)?;
        }
        if self.download_timeout_secs == 0 {
            return Err(UpkeepError::ConfigError {
                message: "download_timeout_secs must be greater than zero".to_string(),
            }
            .into());
        }
        if self.diff_workers == Some(0) {
            return Err(UpkeepError::ConfigError {
                message: "diff_workers must be greater than zero".to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn repository_parts_of<'a>(&self, repository: &'a str) -> Result<(&'a str, &'a str)> {
        match repository.split_once('/') {
            Some((owner, name))
                if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok((owner, name))
            }
            _ => Err(UpkeepError::ConfigError {
                message: format!("repository must look like 'owner/name', got '{repository}'"),
            }
            .into()),
        }
    }

    /// The configured repository split into owner and name.
    pub fn repository_parts(&self) -> Result<Option<(&str, &str)>> {
        self.repository.as_deref().map(|repo| self.repository_parts_of(repo)).transpose()
    }

    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    #[must_use]
    pub const fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    /// Built-in ignore rules, the configured extras and the executable's own path
    /// together with its staged and previous copies.
    pub fn ignore_rules(&self, executable_relative: Option<&str>) -> Result<IgnoreRules> {
        let rules = IgnoreRules::defaults().extend(&self.extra_ignore)?;
        Ok(match executable_relative {
            Some(relative) => rules
                .with_literal(relative)
                .with_literal(&format!("{relative}{STAGED_EXE_SUFFIX}"))
                .with_literal(&format!("{relative}{PREVIOUS_EXE_SUFFIX}")),
            None => rules,
        })
    }
}
