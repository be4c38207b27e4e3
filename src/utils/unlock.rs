//! Waiting for the application to release its files.
//!
//! The updater never holds a lock on the install tree. Before mutating it, the
//! orchestrator probes the application's executable with a non-destructive
//! open-for-write (append, no create, no truncate). On platforms that lock mapped
//! images the probe fails until the application has exited.

use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, info};

use crate::core::UpkeepError;

/// Outcome of a single probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The file could be opened for writing.
    Released,
    /// The file does not exist, nothing can hold it.
    Missing,
    /// The open failed, most likely because the file is in use.
    Busy,
}

/// Opens `path` for appending without creating or truncating it, then closes it.
#[must_use]
pub fn probe_write_access(path: &Path) -> ProbeResult {
    match OpenOptions::new().append(true).open(path) {
        Ok(_) => ProbeResult::Released,
        Err(e) if e.kind() == io::ErrorKind::NotFound => ProbeResult::Missing,
        Err(e) => {
            debug!("Write probe of {} failed: {}", path.display(), e);
            ProbeResult::Busy
        }
    }
}

/// Polls [`probe_write_access`] every `interval` until it succeeds or `timeout` elapses.
///
/// # Errors
///
/// Returns [`UpkeepError::LockTimeout`] when the file is still busy at the deadline.
pub async fn wait_for_unlock(path: &Path, timeout: Duration, interval: Duration) -> Result<()> {
    let started = Instant::now();
    let deadline = started + timeout;

    loop {
        match probe_write_access(path) {
            ProbeResult::Released | ProbeResult::Missing => {
                info!("{} is not locked ({:?} elapsed)", path.display(), started.elapsed());
                return Ok(());
            }
            ProbeResult::Busy if Instant::now() + interval <= deadline => {
                tokio::time::sleep(interval).await;
            }
            ProbeResult::Busy => {
                return Err(UpkeepError::LockTimeout {
                    path: path.display().to_string(),
                    waited_secs: timeout.as_secs(),
                }
                .into());
            }
        }
    }
}
