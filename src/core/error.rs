//! Error handling for upkeep
//!
//! This module provides the error taxonomy of the updater and the mapping from
//! arbitrary errors to user-facing messages. The error system follows two rules:
//! 1. **Strongly-typed errors** ([`UpkeepError`]) classify every failure the
//!    orchestrator has to react to differently (input errors, integrity
//!    violations, transactional failures, interrupted rollbacks)
//! 2. **`anyhow` everywhere else**: operations return [`anyhow::Result`] and attach
//!    context with `.context()`; a classified error travels as the root cause or
//!    as a context layer and is recovered with `downcast_ref`
//!
//! # Error Categories
//!
//! - **Input**: [`UpkeepError::UnsupportedArchiveFormat`], [`UpkeepError::ManifestParse`],
//!   [`UpkeepError::InvalidManifest`], [`UpkeepError::ReleaseUnavailable`],
//!   [`UpkeepError::NoMatchingAsset`]
//! - **Transient I/O**: [`UpkeepError::Network`], [`UpkeepError::DownloadFailed`]
//! - **Integrity**: [`UpkeepError::PathTraversal`], [`UpkeepError::UnsupportedEntryType`]
//! - **Transactional**: [`UpkeepError::ApplyFailed`], [`UpkeepError::RollbackIncomplete`]
//! - **Coordination**: [`UpkeepError::LockTimeout`]
//!
//! # Examples
//!
//! ```rust,no_run
//! use upkeep_cli::core::{UpkeepError, user_friendly_error};
//!
//! let error = anyhow::Error::new(UpkeepError::PathTraversal {
//!     entry: "../../etc/passwd".to_string(),
//! });
//! let ctx = user_friendly_error(&error);
//! ctx.display(); // colored output on stderr
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// Classified failures of the update pipeline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpkeepError {
    #[error("Unsupported archive format: {path}")]
    UnsupportedArchiveFormat {
        path: String,
    },

    #[error("Archive entry escapes the destination directory: {entry}")]
    PathTraversal {
        entry: String,
    },

    #[error("Archive entry '{entry}' has unsupported type: {kind}")]
    UnsupportedEntryType {
        entry: String,
        kind: String,
    },

    #[error("Corrupt archive {path}: {reason}")]
    ArchiveCorrupt {
        path: String,
        reason: String,
    },

    #[error("Invalid change manifest syntax in {file}")]
    ManifestParse {
        file: String,
        reason: String,
    },

    #[error("Invalid change manifest: {reason}")]
    InvalidManifest {
        reason: String,
    },

    #[error("Release metadata unavailable from {url}")]
    ReleaseUnavailable {
        url: String,
        reason: String,
    },

    #[error("Release {tag} has no asset for {platform}-{arch}")]
    NoMatchingAsset {
        tag: String,
        platform: String,
        arch: String,
    },

    #[error("Network error: {operation}")]
    Network {
        operation: String,
        reason: String,
    },

    #[error("Download of {url} failed after {attempts} attempts")]
    DownloadFailed {
        url: String,
        attempts: usize,
    },

    #[error("Timed out after {waited_secs}s waiting for {path} to be released")]
    LockTimeout {
        path: String,
        waited_secs: u64,
    },

    #[error("Update failed at '{path}' and was rolled back")]
    ApplyFailed {
        path: String,
    },

    #[error("Rollback did not complete; original files remain in {backup_dir}")]
    RollbackIncomplete {
        backup_dir: String,
    },

    #[error("Configuration error: {message}")]
    ConfigError {
        message: String,
    },

    #[error("{message}")]
    Other {
        message: String,
    },
}

/// An [`UpkeepError`] with an optional actionable suggestion and details.
///
/// Built by [`user_friendly_error`]; rendered to stderr by [`ErrorContext::display`]
/// and into the JSON result message through its [`fmt::Display`] impl.
#[derive(Debug)]
pub struct ErrorContext {
    /// The classified error.
    pub error: UpkeepError,
    /// What the user can do about it.
    pub suggestion: Option<String>,
    /// Additional information, typically the full cause chain.
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub const fn new(error: UpkeepError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Whether the install may be left between two versions and needs manual recovery.
    #[must_use]
    pub const fn is_rollback_incomplete(&self) -> bool {
        matches!(self.error, UpkeepError::RollbackIncomplete { .. })
    }

    /// Print the error with colors to stderr.
    pub fn display(&self) {
        eprintln!("{}: {}", "error".red().bold(), self.error);

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one exists.
///
/// Classified errors are found anywhere in the chain, so callers may wrap them in
/// further `.context()` layers freely. Unclassified errors become
/// [`UpkeepError::Other`] carrying the outermost message.
#[must_use]
pub fn user_friendly_error(error: &anyhow::Error) -> ErrorContext {
    let chain = format!("{error:#}");

    // `downcast_ref` sees context layers, `chain` sees errors nested as sources
    let classified = error
        .downcast_ref::<UpkeepError>()
        .or_else(|| error.chain().find_map(|cause| cause.downcast_ref::<UpkeepError>()))
        .cloned();

    if let Some(upkeep_error) = classified {
        return create_error_context(upkeep_error).with_details(chain);
    }

    if let Some(io_error) = error.chain().find_map(|cause| cause.downcast_ref::<std::io::Error>())
        && io_error.kind() == std::io::ErrorKind::PermissionDenied
    {
        return ErrorContext::new(UpkeepError::Other {
            message: error.to_string(),
        })
        .with_suggestion(
            "Check that the install directory is writable by the user running the updater",
        )
        .with_details(chain);
    }

    ErrorContext::new(UpkeepError::Other {
        message: error.to_string(),
    })
    .with_details(chain)
}

fn create_error_context(error: UpkeepError) -> ErrorContext {
    let suggestion = match &error {
        UpkeepError::UnsupportedArchiveFormat { .. } => {
            Some("Provide the update as a .zip, .tar or .tar.gz archive")
        }
        UpkeepError::PathTraversal { .. } | UpkeepError::UnsupportedEntryType { .. } => Some(
            "The archive is unsafe to extract; download the release again from a trusted source",
        ),
        UpkeepError::ArchiveCorrupt { .. } => {
            Some("The archive may be truncated; download it again")
        }
        UpkeepError::ManifestParse { .. } | UpkeepError::InvalidManifest { .. } => Some(
            "Remove changes.json from the update package to let the updater compute changes",
        ),
        UpkeepError::ReleaseUnavailable { .. } | UpkeepError::Network { .. } => {
            Some("Check your network connection or configure a proxy with --proxy")
        }
        UpkeepError::NoMatchingAsset { .. } => {
            Some("This release does not ship a build for your platform")
        }
        UpkeepError::DownloadFailed { .. } => {
            Some("Retry later or raise download_timeout_secs in updater.toml")
        }
        UpkeepError::LockTimeout { .. } => Some("Close the application and run the update again"),
        UpkeepError::ApplyFailed { .. } => {
            Some("The install was restored; fix the reported problem and update again")
        }
        UpkeepError::RollbackIncomplete { .. } => Some(concat!(
            "Copy the files from the backup directory back into the install directory, ",
            "then delete it and .upkeep-journal.json"
        )),
        UpkeepError::ConfigError { .. } => {
            Some("Check config/updater.toml and the command-line flags")
        }
        UpkeepError::Other { .. } => None,
    };

    let context = ErrorContext::new(error);
    match suggestion {
        Some(suggestion) => context.with_suggestion(suggestion),
        None => context,
    }
}
