//! Complete a deferred self-update.
//!
//! On platforms that lock running executables, `update` stages the new updater
//! as `<exe>.new` and exits with code 10. The launcher then runs
//! `upkeep finalize --exe <exe>` from a different process (for example a copy of
//! the updater, or the application itself) to swap the staged file in before
//! relaunching the updater.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::PathBuf;

use super::CommandContext;
use crate::constants::{LOCK_POLL_INTERVAL, LOCK_WAIT_TIMEOUT};
use crate::upgrade::complete_pending_swap;
use crate::utils::unlock::wait_for_unlock;

/// Command to swap a staged `<exe>.new` into place.
#[derive(Args, Debug)]
pub struct FinalizeCommand {
    /// Executable whose staged replacement should be moved into place
    #[arg(long, value_name = "PATH")]
    exe: PathBuf,
}

impl FinalizeCommand {
    pub async fn execute(self, ctx: &CommandContext) -> Result<()> {
        let exe = if self.exe.is_absolute() {
            self.exe
        } else {
            ctx.install_root.join(self.exe)
        };

        // The updater that staged the file may still be exiting
        wait_for_unlock(&exe, LOCK_WAIT_TIMEOUT, LOCK_POLL_INTERVAL).await?;

        if complete_pending_swap(&exe).await? {
            println!("{} {}", "✓".green(), format!("Updated {}", exe.display()).green());
        } else {
            println!("{}", format!("No pending update for {}", exe.display()).dimmed());
        }
        Ok(())
    }
}
