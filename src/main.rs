//! upkeep CLI entry point
//!
//! Parses arguments, sends logs to `updater.log` in the install directory and
//! maps the command outcome to the process exit code:
//! - `0` - success
//! - `10` - the updater replaced or staged itself and must be relaunched
//! - `1` - failure

use clap::Parser;
use tracing::error;
use upkeep_cli::cli;
use upkeep_cli::constants::EXIT_CODE_ERROR;
use upkeep_cli::core::user_friendly_error;

#[tokio::main]
async fn main() {
    let cli = cli::Cli::parse();

    // Set up colored output for Windows
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).ok();

    let install_root = match cli.install_root() {
        Ok(root) => root,
        Err(e) => {
            user_friendly_error(&e).display();
            std::process::exit(EXIT_CODE_ERROR);
        }
    };

    let log_guard = match cli.init_logging(&install_root) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: logging disabled: {e:#}");
            None
        }
    };

    let code = match cli.execute(install_root).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            user_friendly_error(&e).display();
            EXIT_CODE_ERROR
        }
    };

    // process::exit skips destructors; flush the log first
    drop(log_guard);
    std::process::exit(code);
}
