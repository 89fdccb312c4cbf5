//! Restore run: fetch a backup, unpack it, and replay it into the service.
//!
//! Replay order per namespace is: create the namespace, then deployed apps,
//! then drafts, then connections. Every write is an upsert, so restoring the
//! same backup twice converges to the same state.

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::archive;
use crate::config::{AppConfigurationEncoding, Config, StorageLayout};
use crate::model::{Application, Connection, Namespace, PipelineDraft};
use crate::report::{ItemKind, RunReport};
use crate::service::PipelineService;
use crate::staging::{read_json, DocumentKind, StagingStore};
use crate::storage::{
    blobs, dated_archive_name, join_key, ArchiveManifest, ObjectStorage, Prefixes,
    LATEST_ARCHIVE_NAME,
};
use crate::utils::errors::{BackupError, Result};

/// Restore job configuration
#[derive(Debug, Clone)]
pub struct RestoreJob {
    /// Capture date of a dated archive; the latest slot when `None`
    pub version: Option<String>,
    pub restore_dir: PathBuf,
    pub layout: StorageLayout,
    pub prefixes: Prefixes,
    pub app_configuration: AppConfigurationEncoding,
}

impl RestoreJob {
    pub fn from_config(config: &Config, version: Option<String>) -> Self {
        Self {
            version,
            restore_dir: config.paths.restore_dir.clone(),
            layout: config.strategy.layout,
            prefixes: Prefixes::from(&config.storage),
            app_configuration: config.service.app_configuration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    Completed,
    /// The backup holds no namespaces; nothing was written
    NothingToRestore,
}

/// Restore execution result
#[derive(Debug)]
pub struct RestoreResult {
    pub status: RestoreStatus,
    /// Object key (or blob prefix) the backup was read from
    pub source: String,
    pub report: RunReport,
    pub duration_secs: u64,
}

pub struct RestoreExecutor<'a> {
    service: &'a dyn PipelineService,
    storage: &'a ObjectStorage,
}

impl<'a> RestoreExecutor<'a> {
    pub fn new(service: &'a dyn PipelineService, storage: &'a ObjectStorage) -> Self {
        Self { service, storage }
    }

    /// Execute a restore job
    #[tracing::instrument(skip_all, fields(version = job.version.as_deref().unwrap_or("latest")))]
    pub async fn execute(&self, job: &RestoreJob) -> Result<RestoreResult> {
        let start_time = Instant::now();
        info!("Starting restore process");

        let (staging, source) = match job.layout {
            StorageLayout::Archive => self.fetch_archive(job).await?,
            StorageLayout::PerBlob => self.fetch_blobs(job).await?,
        };

        let mut report = RunReport::new();
        let namespaces = staging.read_namespaces()?.unwrap_or_default();
        let status = if namespaces.is_empty() {
            warn!("No namespaces found in backup. Exiting restore process.");
            RestoreStatus::NothingToRestore
        } else {
            for namespace in &namespaces {
                self.restore_namespace(job, &staging, namespace, &mut report)
                    .await;
            }
            RestoreStatus::Completed
        };

        report.log_summary("Restore");
        let duration_secs = start_time.elapsed().as_secs();
        info!("Restore process finished in {}s", duration_secs);

        Ok(RestoreResult {
            status,
            source,
            report,
            duration_secs,
        })
    }

    /// Resolve the archive to restore and unpack it under the restore dir.
    async fn fetch_archive(&self, job: &RestoreJob) -> Result<(StagingStore, String)> {
        let key = self.resolve_archive_key(job).await?;
        let file_name = key.rsplit('/').next().unwrap_or(&key).to_string();
        let zip_path = job.restore_dir.join(&file_name);
        let stem = Path::new(&file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| file_name.clone());

        self.storage.download_file(&key, &zip_path).await?;

        let staging = StagingStore::new(job.restore_dir.join(stem));
        staging.reset()?;
        let dest = staging.root().to_path_buf();
        tokio::task::spawn_blocking(move || archive::extract_file(&zip_path, &dest)).await??;

        Ok((staging, key))
    }

    async fn resolve_archive_key(&self, job: &RestoreJob) -> Result<String> {
        if let Some(version) = &job.version {
            return self.resolve_version_key(job, version).await;
        }

        let fixed = join_key(&job.prefixes.latest, LATEST_ARCHIVE_NAME);
        let archives: Vec<String> = self
            .storage
            .list(&job.prefixes.latest)
            .await?
            .into_iter()
            .filter(|key| key.ends_with(".zip"))
            .collect();
        if archives.contains(&fixed) {
            return Ok(fixed);
        }
        archives.into_iter().next().ok_or_else(|| {
            BackupError::Storage(format!(
                "No backup archive found under '{}/{}'",
                self.storage.location(),
                job.prefixes.latest
            ))
        })
    }

    /// Look the date up in the manifest, then fall back to the dated archive
    /// name for history the manifest does not cover.
    async fn resolve_version_key(&self, job: &RestoreJob, version: &str) -> Result<String> {
        let manifest = match ArchiveManifest::load(self.storage, &job.prefixes.archive).await {
            Ok(manifest) => manifest,
            Err(BackupError::Serialization(e)) => {
                warn!("Archive manifest is unreadable: {}", e);
                None
            }
            Err(e) => return Err(e),
        };
        if let Some(entry) = manifest.as_ref().and_then(|m| m.find(version)) {
            return Ok(entry.key.clone());
        }

        let key = join_key(&job.prefixes.archive, &dated_archive_name(version));
        if self.storage.exists(&key).await? {
            info!("Version '{}' is not in the manifest, using '{}'", version, key);
            return Ok(key);
        }
        Err(BackupError::VersionNotFound(version.to_string()))
    }

    async fn fetch_blobs(&self, job: &RestoreJob) -> Result<(StagingStore, String)> {
        if let Some(version) = &job.version {
            return Err(BackupError::Config(format!(
                "restore version '{}' requires the archive layout",
                version
            )));
        }
        let staging = StagingStore::new(job.restore_dir.join("blobs"));
        if blobs::materialize(self.storage, &job.prefixes.blobs, &staging)
            .await?
            .is_none()
        {
            // an empty tree reads as a backup without namespaces
            staging.reset()?;
        }
        Ok((staging, job.prefixes.blobs.clone()))
    }

    async fn restore_namespace(
        &self,
        job: &RestoreJob,
        staging: &StagingStore,
        namespace: &Namespace,
        report: &mut RunReport,
    ) {
        let ns = namespace.name.as_str();
        info!("Restoring namespace: {}", ns);

        let files = match staging.namespace_files(ns) {
            Ok(files) => files,
            Err(e) => {
                error!("Failed to read backup files of '{}': {}", ns, e);
                report.record_failure(ItemKind::Namespace, ns, ns, e);
                return;
            }
        };

        if namespace.is_reserved() {
            info!("Namespace '{}' always exists, not recreating it", ns);
        } else {
            let created = match serde_json::to_value(namespace) {
                Ok(payload) => self.service.create_namespace(ns, &payload).await,
                Err(e) => Err(e.into()),
            };
            match created {
                Ok(()) => {
                    info!("Namespace '{}' created successfully.", ns);
                    report.record_ok(ItemKind::Namespace, ns, ns);
                }
                Err(e) => {
                    error!("Failed to create namespace '{}': {}", ns, e);
                    report.record_failure(ItemKind::Namespace, ns, ns, e);
                    return;
                }
            }
        }

        for path in &files.applications {
            let name = file_resource_name(DocumentKind::Application, path);
            let result = self.restore_application(job, ns, path).await;
            record(report, ItemKind::Application, ns, result, name);
        }
        for path in &files.drafts {
            let name = file_resource_name(DocumentKind::Draft, path);
            let result = self.restore_draft(ns, path).await;
            record(report, ItemKind::Draft, ns, result, name);
        }
        for path in &files.connections {
            let name = file_resource_name(DocumentKind::Connection, path);
            let result = self.restore_connection(ns, path).await;
            record(report, ItemKind::Connection, ns, result, name);
        }
    }

    async fn restore_application(
        &self,
        job: &RestoreJob,
        ns: &str,
        path: &Path,
    ) -> Result<String> {
        let mut app: Application = read_json(path)?;
        if app.name.is_empty() {
            app.name = file_resource_name(DocumentKind::Application, path);
        }
        if job.app_configuration == AppConfigurationEncoding::String {
            app.encode_configuration()?;
        }
        let payload = serde_json::to_value(&app)?;
        self.service.upsert_application(ns, &app.name, &payload).await?;
        Ok(app.name)
    }

    async fn restore_draft(&self, ns: &str, path: &Path) -> Result<String> {
        let draft: PipelineDraft = read_json(path)?;
        let payload = serde_json::to_value(&draft)?;
        self.service.upsert_pipeline_draft(ns, &draft.id, &payload).await?;
        Ok(draft.name)
    }

    async fn restore_connection(&self, ns: &str, path: &Path) -> Result<String> {
        let connection: Connection = read_json(path)?;
        let payload: Value = serde_json::to_value(&connection)?;
        self.service
            .upsert_connection(ns, &connection.name, &payload)
            .await?;
        Ok(connection.name)
    }
}

/// Record a replayed document under its own name, or under the name from
/// its file when it could not be read.
fn record(
    report: &mut RunReport,
    kind: ItemKind,
    ns: &str,
    result: Result<String>,
    fallback_name: String,
) {
    match result {
        Ok(name) => {
            info!("Restored {} '{}' in '{}'", kind, name, ns);
            report.record_ok(kind, ns, &name);
        }
        Err(e) => {
            error!("Failed to restore {} '{}' in '{}': {}", kind, fallback_name, ns, e);
            report.record_failure(kind, ns, &fallback_name, e);
        }
    }
}

fn file_resource_name(kind: DocumentKind, path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    kind.resource_name(&file_name)
}
