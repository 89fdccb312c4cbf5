//! Pipeline Backup Library
//!
//! Backs up the configuration of a managed data-pipeline service
//! (namespaces, pipeline drafts, deployed apps and connections) to object
//! storage, and restores it from there.

pub mod archive;
pub mod auth;
pub mod backup;
pub mod config;
pub mod model;
pub mod report;
pub mod restore;
pub mod service;
pub mod staging;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use utils::errors::{BackupError, Result};
