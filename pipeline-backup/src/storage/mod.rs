//! Object-storage gateway.
//!
//! Wraps an [`ObjectStore`] (GCS in production, a local directory or memory
//! otherwise) behind the handful of operations the runs need.

pub mod blobs;
pub mod manifest;

use bytes::Bytes;
use futures_util::TryStreamExt;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{StorageBackendKind, StorageConfig};
use crate::utils::errors::{BackupError, Result};

pub use manifest::{ArchiveEntry, ArchiveManifest};

/// Fixed name of the archive in the latest slot.
pub const LATEST_ARCHIVE_NAME: &str = "backup.zip";

/// Name of the dated archive for a capture date (`YYYY-MM-DD`).
pub fn dated_archive_name(date: &str) -> String {
    format!("{}_backup.zip", date)
}

/// Join a prefix and a relative key with exactly one `/`.
pub fn join_key(prefix: &str, key: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let key = key.trim_start_matches('/');
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}/{}", prefix, key)
    }
}

/// Object-storage locations a run reads from and writes to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prefixes {
    /// Single most recent archive
    pub latest: String,
    /// Dated archives plus the manifest
    pub archive: String,
    /// Per-blob layout root
    pub blobs: String,
}

impl From<&StorageConfig> for Prefixes {
    fn from(config: &StorageConfig) -> Self {
        Self {
            latest: config.latest_prefix.clone(),
            archive: config.archive_prefix.clone(),
            blobs: config.blob_prefix.clone(),
        }
    }
}

impl Default for Prefixes {
    fn default() -> Self {
        Self::from(&StorageConfig::default())
    }
}

#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    /// Human-readable location, used in logs
    location: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("location", &self.location)
            .finish()
    }
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>, location: impl Into<String>) -> Self {
        Self {
            store,
            location: location.into(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory://")
    }

    pub fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackendKind::Gcs => {
                let store = GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(config.bucket.clone())
                    .build()?;
                Ok(Self::new(Arc::new(store), format!("gs://{}", config.bucket)))
            }
            StorageBackendKind::Local => {
                std::fs::create_dir_all(&config.local_root)?;
                let store = LocalFileSystem::new_with_prefix(&config.local_root)?;
                Ok(Self::new(
                    Arc::new(store),
                    format!("file://{}", config.local_root.display()),
                ))
            }
            StorageBackendKind::Memory => Ok(Self::in_memory()),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn put_bytes(&self, key: &str, bytes: impl Into<Bytes>) -> Result<()> {
        let bytes: Bytes = bytes.into();
        let size = bytes.len();
        let put_result = self
            .store
            .put(&ObjectPath::from(key), bytes.into())
            .await?;
        debug!(key, size, ?put_result, "Uploaded object");
        Ok(())
    }

    /// `None` when the object does not exist.
    pub async fn get_bytes(&self, key: &str) -> Result<Option<Bytes>> {
        match self.store.get(&ObjectPath::from(key)).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&ObjectPath::from(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn upload_file(&self, key: &str, path: &Path) -> Result<()> {
        let content = tokio::fs::read(path).await?;
        self.put_bytes(key, content).await?;
        info!("Uploaded '{}' to '{}/{}'", path.display(), self.location, key);
        Ok(())
    }

    /// Download `key` to `path`; fails with a storage error if it is missing.
    pub async fn download_file(&self, key: &str, path: &Path) -> Result<()> {
        let content = self.get_bytes(key).await?.ok_or_else(|| {
            BackupError::Storage(format!("'{}/{}' does not exist", self.location, key))
        })?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &content).await?;
        info!("Downloaded '{}/{}' to '{}'", self.location, key, path.display());
        Ok(())
    }

    pub async fn put_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.put_bytes(key, serde_json::to_vec_pretty(value)?).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Keys under `prefix`, sorted.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = ObjectPath::from(prefix);
        let mut keys: Vec<String> = self
            .store
            .list(Some(&prefix))
            .map_ok(|meta| meta.location.to_string())
            .try_collect()
            .await?;
        keys.sort();
        Ok(keys)
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&ObjectPath::from(key)).await?;
        Ok(())
    }
}
