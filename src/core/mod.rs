//! Core types for upkeep
//!
//! This module holds the error taxonomy shared by every stage of the update
//! pipeline:
//! - [`UpkeepError`] - Enumerated failure classes the orchestrator reacts to
//! - [`ErrorContext`] - User-friendly error wrapper with suggestions and details
//! - [`user_friendly_error`] - Convert any `anyhow::Error` to user-friendly format

pub mod error;

pub use error::{ErrorContext, UpkeepError, user_friendly_error};
