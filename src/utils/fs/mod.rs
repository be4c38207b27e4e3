//! File system utilities for the update pipeline.
//!
//! - [`atomic`]: temp-and-rename writes and copies
//! - [`dirs`]: directory creation, empty-directory cleanup and file moves
//! - [`paths`]: lexical resolution of untrusted relative names

pub mod atomic;
pub mod dirs;
pub mod paths;

pub use atomic::{atomic_copy, atomic_write};
pub use dirs::{ensure_dir, move_file, remove_dir_all, remove_dir_if_empty};
pub use paths::{join_relative, relative_parent, relative_slash_path, resolve_relative};
