//! Backup run: capture every namespace into a staging tree, then publish it.
//!
//! Per-item read failures are recorded and skipped. A failed bulk export or
//! a staging I/O error aborts the run before anything is published.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::archive;
use crate::config::{Config, PipelineSource, StorageLayout};
use crate::model::Namespace;
use crate::report::{ItemKind, RunReport};
use crate::service::PipelineService;
use crate::staging::{safe_file_stem, DocumentKind, StagingStore};
use crate::storage::{
    blobs, dated_archive_name, join_key, ArchiveEntry, ArchiveManifest, ObjectStorage, Prefixes,
    LATEST_ARCHIVE_NAME,
};
use crate::utils::errors::Result;

/// Today's capture date, `YYYY-MM-DD` in local time.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Backup job configuration
#[derive(Debug, Clone)]
pub struct BackupJob {
    /// Capture date, names the staging tree and the dated archive
    pub date: String,
    pub backup_dir: PathBuf,
    pub pipeline_source: PipelineSource,
    pub layout: StorageLayout,
    pub prefixes: Prefixes,
}

impl BackupJob {
    pub fn from_config(config: &Config, date: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            backup_dir: config.paths.backup_dir.clone(),
            pipeline_source: config.strategy.pipeline_source,
            layout: config.strategy.layout,
            prefixes: Prefixes::from(&config.storage),
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.backup_dir.join(format!("{}_backup", self.date))
    }

    pub fn archive_path(&self) -> PathBuf {
        self.backup_dir.join(dated_archive_name(&self.date))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupStatus {
    /// Staging tree uploaded
    Published,
    /// The service listed no namespaces; nothing was written
    NothingToBackup,
    /// Capture finished but the upload did not
    PublishFailed(String),
}

/// Backup execution result
#[derive(Debug)]
pub struct BackupResult {
    pub status: BackupStatus,
    pub report: RunReport,
    pub staging_dir: PathBuf,
    /// Object keys written by the publish step
    pub published_keys: Vec<String>,
    /// Set when the archives were uploaded but the manifest was not updated
    pub manifest_error: Option<String>,
    pub duration_secs: u64,
}

/// What the publish step wrote.
#[derive(Debug, Default)]
struct Published {
    keys: Vec<String>,
    manifest_error: Option<String>,
}

pub struct BackupExecutor<'a> {
    service: &'a dyn PipelineService,
    storage: &'a ObjectStorage,
}

impl<'a> BackupExecutor<'a> {
    pub fn new(service: &'a dyn PipelineService, storage: &'a ObjectStorage) -> Self {
        Self { service, storage }
    }

    /// Execute a backup job
    #[tracing::instrument(skip_all, fields(date = %job.date))]
    pub async fn execute(&self, job: &BackupJob) -> Result<BackupResult> {
        let start_time = Instant::now();
        let staging = StagingStore::new(job.staging_dir());
        let mut report = RunReport::new();

        info!("Starting backup process");
        let namespaces = self.service.list_namespaces().await;
        if namespaces.is_empty() {
            warn!("No namespaces found to backup.");
            return Ok(BackupResult {
                status: BackupStatus::NothingToBackup,
                report,
                staging_dir: staging.root().to_path_buf(),
                published_keys: Vec::new(),
                manifest_error: None,
                duration_secs: start_time.elapsed().as_secs(),
            });
        }
        info!("Found {} namespaces", namespaces.len());

        staging.reset()?;
        staging.write_namespaces(&namespaces)?;

        if job.pipeline_source.includes_deployed() {
            self.capture_deployed_apps(&staging, &namespaces, &mut report)
                .await?;
        }

        for namespace in &namespaces {
            match self
                .capture_namespace(job, &staging, namespace, &mut report)
                .await
            {
                Ok(()) => report.record_ok(ItemKind::Namespace, &namespace.name, &namespace.name),
                Err(e) => {
                    error!("Failed to back up namespace '{}': {}", namespace.name, e);
                    report.record_failure(ItemKind::Namespace, &namespace.name, &namespace.name, e);
                }
            }
        }

        let (status, published) = match self.publish(job, &staging, &namespaces).await {
            Ok(published) => (BackupStatus::Published, published),
            Err(e) => {
                error!("Failed to compress and upload backup files: {}", e);
                (BackupStatus::PublishFailed(e.to_string()), Published::default())
            }
        };

        report.log_summary("Backup");
        let duration_secs = start_time.elapsed().as_secs();
        info!("Backup process finished in {}s: {:?}", duration_secs, status);

        Ok(BackupResult {
            status,
            report,
            staging_dir: staging.root().to_path_buf(),
            published_keys: published.keys,
            manifest_error: published.manifest_error,
            duration_secs,
        })
    }

    /// Bulk-export the deployed apps, unpack them into the staging tree and
    /// normalize each app document.
    async fn capture_deployed_apps(
        &self,
        staging: &StagingStore,
        namespaces: &[Namespace],
        report: &mut RunReport,
    ) -> Result<()> {
        info!("Exporting deployed applications");
        let export = self.service.export_applications().await?;
        info!("Downloaded application export ({} bytes)", export.len());

        let root = staging.root().to_path_buf();
        let files = tokio::task::spawn_blocking(move || archive::extract_bytes(&export, &root))
            .await??;
        info!("Unpacked {} exported application files", files);

        staging.format_deployed_apps(namespaces, report);
        Ok(())
    }

    async fn capture_namespace(
        &self,
        job: &BackupJob,
        staging: &StagingStore,
        namespace: &Namespace,
        report: &mut RunReport,
    ) -> Result<()> {
        let ns = namespace.name.as_str();
        info!("Processing namespace: {}", ns);
        staging.ensure_namespace_dir(ns)?;

        if job.pipeline_source.includes_drafts() {
            let drafts = self.service.list_pipeline_drafts(ns).await;
            info!("Found {} pipeline drafts in '{}'", drafts.len(), ns);
            let mut stems: HashMap<String, usize> = HashMap::new();
            for summary in &drafts {
                *stems.entry(safe_file_stem(&summary.name)).or_default() += 1;
            }

            for summary in drafts {
                // drafts are identified by id; a shared name gets the id appended
                let staged_name = if stems[&safe_file_stem(&summary.name)] > 1 {
                    format!("{}_{}", summary.name, summary.id)
                } else {
                    summary.name.clone()
                };
                if staging.document_path(ns, DocumentKind::Draft, &staged_name).exists() {
                    warn!(
                        "Draft file for '{}' ({}) in '{}' already exists",
                        summary.name, summary.id, ns
                    );
                    report.record_failure(
                        ItemKind::Draft,
                        ns,
                        &staged_name,
                        "file name collides with another draft",
                    );
                    continue;
                }

                match self.service.fetch_pipeline_draft(ns, &summary.id).await {
                    Some(draft) => {
                        staging.write_document(ns, DocumentKind::Draft, &staged_name, &draft)?;
                        report.record_ok(ItemKind::Draft, ns, &staged_name);
                    }
                    None => {
                        warn!("Skipping draft '{}' ({}) in '{}'", summary.name, summary.id, ns);
                        report.record_failure(
                            ItemKind::Draft,
                            ns,
                            &staged_name,
                            "draft could not be fetched",
                        );
                    }
                }
            }
        }

        let connections = self.service.list_connections(ns).await;
        info!("Found {} connections in '{}'", connections.len(), ns);
        for connection in connections {
            staging.write_document(ns, DocumentKind::Connection, &connection.name, &connection)?;
            report.record_ok(ItemKind::Connection, ns, &connection.name);
        }
        Ok(())
    }

    async fn publish(
        &self,
        job: &BackupJob,
        staging: &StagingStore,
        namespaces: &[Namespace],
    ) -> Result<Published> {
        match job.layout {
            StorageLayout::Archive => self.publish_archive(job, staging).await,
            StorageLayout::PerBlob => {
                blobs::publish(self.storage, staging, &job.prefixes.blobs, namespaces).await?;
                Ok(Published {
                    keys: vec![blobs::namespaces_key(&job.prefixes.blobs)],
                    manifest_error: None,
                })
            }
        }
    }

    /// Compress the staging tree and upload it to the dated history location
    /// and the latest slot. The manifest is updated last; a failure there
    /// leaves both uploads in place.
    async fn publish_archive(&self, job: &BackupJob, staging: &StagingStore) -> Result<Published> {
        let src = staging.root().to_path_buf();
        let zip_path = job.archive_path();
        let dest = zip_path.clone();
        tokio::task::spawn_blocking(move || archive::compress_dir(&src, &dest)).await??;

        let dated_key = join_key(&job.prefixes.archive, &dated_archive_name(&job.date));
        self.storage.upload_file(&dated_key, &zip_path).await?;

        let latest_key = join_key(&job.prefixes.latest, LATEST_ARCHIVE_NAME);
        self.storage.upload_file(&latest_key, &zip_path).await?;

        let mut published = Published {
            keys: vec![dated_key.clone(), latest_key],
            manifest_error: None,
        };
        match self.record_in_manifest(job, &dated_key).await {
            Ok(()) => published.keys.push(ArchiveManifest::key(&job.prefixes.archive)),
            Err(e) => {
                error!("Failed to update the archive manifest: {}", e);
                published.manifest_error = Some(e.to_string());
            }
        }
        Ok(published)
    }

    async fn record_in_manifest(&self, job: &BackupJob, dated_key: &str) -> Result<()> {
        let mut manifest =
            ArchiveManifest::load_or_rebuild(self.storage, &job.prefixes.archive).await?;
        manifest.upsert(ArchiveEntry {
            date: job.date.clone(),
            key: dated_key.to_string(),
            created_at: chrono::Utc::now(),
        });
        manifest.save(self.storage, &job.prefixes.archive).await
    }
}
