//! Error types for backup and restore runs.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("API error: HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Malformed JSON in {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid document {}: {reason}", path.display())]
    InvalidDocument { path: PathBuf, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backup version '{0}' was not found in the archive history")]
    VersionNotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub fn decode(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Decode {
            path: path.into(),
            source,
        }
    }

    /// True for the errors that come from the storage side of a run
    /// (archive building, upload and download).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::ObjectStore(_) | Self::Archive(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
