//! Cross-platform utilities and helpers
//!
//! # Modules
//!
//! - [`fs`] - Atomic writes and copies, directory cleanup, lexical path resolution
//! - [`platform`] - Asset naming, executable replacement capability, detached spawning
//! - [`progress`] - Download progress bars on stderr
//! - [`unlock`] - Non-destructive probing for files still held by the application
//!
//! # Example
//!
//! ```rust,no_run
//! use upkeep_cli::utils::{atomic_write, ensure_dir, resolve_relative};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! ensure_dir(Path::new("update_temp"))?;
//! atomic_write(Path::new("version.txt"), b"v1.2.0\n")?;
//! assert_eq!(resolve_relative("bin\\..\\lib/x.so").as_deref(), Some("lib/x.so"));
//! # Ok(())
//! # }
//! ```

pub mod fs;
pub mod platform;
pub mod progress;
pub mod unlock;

pub use fs::{
    atomic_copy, atomic_write, ensure_dir, join_relative, move_file, remove_dir_all,
    remove_dir_if_empty, resolve_relative,
};
pub use platform::{can_replace_running_executable, is_windows};
pub use unlock::wait_for_unlock;
