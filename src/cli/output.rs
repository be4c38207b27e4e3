//! Machine-readable results of the `update` command.
//!
//! Each phase prints exactly one JSON object on its own line to stdout:
//!
//! ```json
//! {"phase":"update","status":"success","updated":true,"restart_required":true,"message":"Updated 3 files","version":"v1.4.0"}
//! ```

use serde::Serialize;

use crate::constants::{EXIT_CODE_ERROR, EXIT_CODE_SELF_UPDATE};
use crate::core::ErrorContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Comparing the installed version with the latest release.
    Check,
    /// Downloading, extracting and applying an update.
    Update,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Success,
    Failed,
    /// The updater replaced or staged its own executable and must be relaunched.
    SelfUpdatePending,
    /// A failed apply could not restore every file; see the backup directory.
    RollbackIncomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateResult {
    pub phase: Phase,
    pub status: Status,
    pub updated: bool,
    pub restart_required: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl UpdateResult {
    pub fn success(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            status: Status::Success,
            updated: false,
            restart_required: false,
            message: message.into(),
            version: None,
        }
    }

    pub fn self_update_pending(message: impl Into<String>) -> Self {
        Self {
            phase: Phase::Update,
            status: Status::SelfUpdatePending,
            updated: false,
            restart_required: true,
            message: message.into(),
            version: None,
        }
    }

    /// A failure result carrying the user-facing error text.
    #[must_use]
    pub fn failed(phase: Phase, error: &ErrorContext) -> Self {
        let status = if error.is_rollback_incomplete() {
            Status::RollbackIncomplete
        } else {
            Status::Failed
        };
        let message = match &error.suggestion {
            Some(suggestion) => format!("{}. {}", error.error, suggestion),
            None => error.error.to_string(),
        };

        Self {
            phase,
            status,
            updated: false,
            restart_required: false,
            message,
            version: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    #[must_use]
    pub const fn updated(mut self, updated: bool) -> Self {
        self.updated = updated;
        self.restart_required = updated;
        self
    }

    /// Process exit code this result maps to.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self.status {
            Status::Success => 0,
            Status::SelfUpdatePending => EXIT_CODE_SELF_UPDATE,
            Status::Failed | Status::RollbackIncomplete => EXIT_CODE_ERROR,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                concat!(
                    r#"{{"phase":"update","status":"failed","updated":false,"#,
                    r#""restart_required":false,"message":"result serialization failed: {}"}}"#
                ),
                e
            )
        })
    }

    /// Prints the result as one line on stdout.
    pub fn emit(&self) {
        println!("{}", self.to_json());
    }
}
