//! Bearer credential acquisition.
//!
//! The token is fetched once at the start of every run and never cached
//! across runs.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info};

use crate::config::AuthConfig;
use crate::utils::errors::{BackupError, Result};

#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Runs an external credential CLI and uses its trimmed stdout as the token.
#[derive(Debug, Clone)]
pub struct CommandTokenProvider {
    program: String,
    args: Vec<String>,
}

impl CommandTokenProvider {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl TokenProvider for CommandTokenProvider {
    async fn access_token(&self) -> Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .output()
            .await
            .map_err(|e| {
                error!("Failed to run credential command '{}': {}", self.program, e);
                BackupError::Auth(format!("unable to run '{}': {}", self.program, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!("Failed to retrieve access token: {}", stderr.trim());
            return Err(BackupError::Auth(format!(
                "'{}' exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(BackupError::Auth(format!(
                "'{}' printed an empty token",
                self.program
            )));
        }

        info!("Successfully retrieved access token");
        Ok(token)
    }
}

/// A token supplied up front through configuration.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(BackupError::Auth("configured token is empty".into()));
        }
        Ok(self.token.trim().to_string())
    }
}

/// Pick the provider described by the configuration.
pub fn from_config(config: &AuthConfig) -> Box<dyn TokenProvider> {
    match &config.token {
        Some(token) => Box::new(StaticTokenProvider::new(token.clone())),
        None => Box::new(CommandTokenProvider::new(
            config.command.clone(),
            config.args.clone(),
        )),
    }
}
