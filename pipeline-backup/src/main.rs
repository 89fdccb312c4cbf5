//! Pipeline Backup - Main entry point
//!
//! Run failures are logged and the process still exits successfully; only
//! invalid arguments produce a non-zero exit status.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pipeline_backup::backup::{self, BackupExecutor, BackupJob};
use pipeline_backup::restore::{RestoreExecutor, RestoreJob};
use pipeline_backup::service::HttpPipelineClient;
use pipeline_backup::storage::ObjectStorage;
use pipeline_backup::{auth, utils, Config};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Back up every namespace to object storage
    Backup,
    /// Restore a backup into the service
    Restore {
        /// Capture date (YYYY-MM-DD) of a dated archive; latest when omitted
        #[arg(long, value_name = "DATE")]
        restore_version: Option<String>,
    },
}

impl Command {
    fn operation(&self) -> &'static str {
        match self {
            Command::Backup => "backup",
            Command::Restore { .. } => "restore",
        }
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = Config::load(args.config.as_deref());
    let log_level = args
        .log_level
        .clone()
        .or_else(|| config.as_ref().ok().map(|c| c.log.level.clone()))
        .unwrap_or_else(|| "info".to_string());
    if let Err(e) = utils::logger::init(&log_level) {
        eprintln!("Failed to initialize logging: {e}");
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            return;
        }
    };

    tracing::info!(
        "Starting pipeline-backup v{} ({})",
        env!("CARGO_PKG_VERSION"),
        args.command.operation()
    );

    let operation = args.command.operation();
    if let Err(e) = run(args.command, &config).await {
        tracing::error!("An unexpected error occurred during {}: {:#}", operation, e);
    }
}

async fn run(command: Command, config: &Config) -> Result<()> {
    let token = auth::from_config(&config.auth)
        .access_token()
        .await
        .context("failed to obtain an access token")?;
    let service = HttpPipelineClient::new(&config.service.base_url, token, config.retry.clone())?;
    let storage = ObjectStorage::from_config(&config.storage)?;
    tracing::info!("Using object storage at {}", storage.location());

    match command {
        Command::Backup => {
            let job = BackupJob::from_config(config, backup::today());
            let result = BackupExecutor::new(&service, &storage).execute(&job).await?;
            tracing::info!(
                "Backup {:?}: {} items failed",
                result.status,
                result.report.total_failed()
            );
        }
        Command::Restore { restore_version } => {
            let job = RestoreJob::from_config(config, restore_version);
            let result = RestoreExecutor::new(&service, &storage).execute(&job).await?;
            tracing::info!(
                "Restore from '{}' {:?}: {} items failed",
                result.source,
                result.status,
                result.report.total_failed()
            );
        }
    }
    Ok(())
}
