//! Manifest of the dated archives in the history location.
//!
//! Serialized as `manifest.json` next to the archives, so that a version can
//! be resolved without parsing object names.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{dated_archive_name, join_key, ObjectStorage};
use crate::utils::errors::{BackupError, Result};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveManifest {
    pub version: u32,
    /// Sorted by date, oldest first; at most one entry per date
    pub archives: Vec<ArchiveEntry>,
}

/// One dated archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    /// Capture date, `YYYY-MM-DD`
    pub date: String,
    /// Full object key of the archive
    pub key: String,
    pub created_at: DateTime<Utc>,
}

impl Default for ArchiveManifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            archives: Vec::new(),
        }
    }
}

impl ArchiveManifest {
    /// Record an archive; a later run on the same date replaces the entry.
    pub fn upsert(&mut self, entry: ArchiveEntry) {
        self.archives.retain(|e| e.date != entry.date);
        self.archives.push(entry);
        self.archives.sort_by(|a, b| a.date.cmp(&b.date));
    }

    pub fn find(&self, date: &str) -> Option<&ArchiveEntry> {
        self.archives.iter().find(|e| e.date == date)
    }

    pub fn key(archive_prefix: &str) -> String {
        join_key(archive_prefix, MANIFEST_FILE)
    }

    /// `None` when no manifest has been written yet.
    pub async fn load(storage: &ObjectStorage, archive_prefix: &str) -> Result<Option<Self>> {
        storage.get_json(&Self::key(archive_prefix)).await
    }

    /// Load the manifest, rebuilding it from the stored archives when it is
    /// missing or unreadable.
    pub async fn load_or_rebuild(storage: &ObjectStorage, archive_prefix: &str) -> Result<Self> {
        match Self::load(storage, archive_prefix).await {
            Ok(Some(manifest)) => Ok(manifest),
            Ok(None) => Self::rebuild(storage, archive_prefix).await,
            Err(BackupError::Serialization(e)) => {
                warn!("Archive manifest is unreadable ({}), rebuilding it", e);
                Self::rebuild(storage, archive_prefix).await
            }
            Err(e) => Err(e),
        }
    }

    /// Manifest listing every `{date}_backup.zip` directly under the prefix.
    pub async fn rebuild(storage: &ObjectStorage, archive_prefix: &str) -> Result<Self> {
        let mut manifest = Self::default();
        for key in storage.list(archive_prefix).await? {
            let Some(date) = archive_date(archive_prefix, &key) else {
                continue;
            };
            let created_at = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or_else(Utc::now);
            manifest.upsert(ArchiveEntry {
                date,
                key,
                created_at,
            });
        }
        info!(
            "Rebuilt archive manifest from storage: {} archives",
            manifest.archives.len()
        );
        Ok(manifest)
    }

    pub async fn save(&self, storage: &ObjectStorage, archive_prefix: &str) -> Result<()> {
        storage.put_json(&Self::key(archive_prefix), self).await?;
        info!("Archive manifest updated: {} archives", self.archives.len());
        Ok(())
    }
}

/// Capture date of a dated archive key, when the key is exactly
/// `{prefix}/{YYYY-MM-DD}_backup.zip`.
fn archive_date(archive_prefix: &str, key: &str) -> Option<String> {
    let date = key
        .strip_prefix(&join_key(archive_prefix, ""))?
        .strip_suffix("_backup.zip")?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    (join_key(archive_prefix, &dated_archive_name(date)) == key).then(|| date.to_string())
}
