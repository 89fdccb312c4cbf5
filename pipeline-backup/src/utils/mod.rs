//! Error type and log setup for the `backup` and `restore` commands.

pub mod errors;
pub mod logger;

pub use errors::{BackupError, Result};
