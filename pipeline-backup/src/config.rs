//! Configuration management for backup and restore runs.
//!
//! Loads configuration from an optional TOML file with environment variable
//! overrides (`PIPELINE_BACKUP__SECTION__KEY`).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{BackupError, Result};

const ENV_PREFIX: &str = "PIPELINE_BACKUP";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub auth: AuthConfig,
    pub storage: StorageConfig,
    pub paths: PathsConfig,
    pub strategy: StrategyConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// REST API root, e.g. `https://instance.example.com/api`
    pub base_url: String,

    /// How a deployed app's `configuration` is sent back on restore
    pub app_configuration: AppConfigurationEncoding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppConfigurationEncoding {
    /// Send the decoded object as stored in the backup
    Object,
    /// Re-encode the object into a JSON string
    String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Credential CLI to run; its trimmed stdout is the bearer token
    pub command: String,

    pub args: Vec<String>,

    /// Literal token, skips the credential CLI when set
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    Gcs,
    Local,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackendKind,

    /// Bucket name (gcs backend)
    pub bucket: String,

    /// Root directory (local backend)
    pub local_root: PathBuf,

    /// Prefix holding the single most recent archive
    pub latest_prefix: String,

    /// Prefix holding one dated archive per run plus the manifest
    pub archive_prefix: String,

    /// Prefix for the per-blob layout
    pub blob_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Staging directory for backup runs
    pub backup_dir: PathBuf,

    /// Working directory for restore runs
    pub restore_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineSource {
    /// Pipeline drafts only
    Drafts,
    /// Deployed applications through the bulk export only
    Deployed,
    Both,
}

impl PipelineSource {
    pub fn includes_drafts(self) -> bool {
        matches!(self, Self::Drafts | Self::Both)
    }

    pub fn includes_deployed(self) -> bool {
        matches!(self, Self::Deployed | Self::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageLayout {
    /// One compressed archive per run
    Archive,
    /// One blob per resource document
    PerBlob,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub pipeline_source: PipelineSource,
    pub layout: StorageLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries per request (0 disables retrying)
    pub max_retries: u32,

    /// Base delay, doubled after each attempt
    pub backoff_ms: u64,

    /// Response statuses that trigger a retry
    pub status_forcelist: Vec<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11015".to_string(),
            app_configuration: AppConfigurationEncoding::Object,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            command: "gcloud".to_string(),
            args: vec![
                "auth".to_string(),
                "application-default".to_string(),
                "print-access-token".to_string(),
            ],
            token: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::Gcs,
            bucket: String::new(),
            local_root: PathBuf::from("./object-store"),
            latest_prefix: "cdf/latest".to_string(),
            archive_prefix: "cdf/archive".to_string(),
            blob_prefix: "cdf/blobs".to_string(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from("./backup"),
            restore_dir: PathBuf::from("./restore"),
        }
    }
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            pipeline_source: PipelineSource::Both,
            layout: StorageLayout::Archive,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            backoff_ms: 2000,
            status_forcelist: vec![500, 502, 503, 504],
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("auth.args")
                .with_list_parse_key("retry.status_forcelist")
                .try_parsing(true),
        );

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from TOML text, without environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(content, config::FileFormat::Toml))
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.service.base_url.trim().is_empty() {
            return Err(BackupError::Config("service.base_url must be set".into()));
        }
        if self.storage.backend == StorageBackendKind::Gcs && self.storage.bucket.is_empty() {
            return Err(BackupError::Config(
                "storage.bucket must be set for the gcs backend".into(),
            ));
        }
        if self.auth.token.is_none() && self.auth.command.is_empty() {
            return Err(BackupError::Config(
                "either auth.token or auth.command must be set".into(),
            ));
        }
        Ok(())
    }
}
