//! Local staging tree.
//!
//! Layout: `namespaces.json` at the root, then one directory per namespace
//! holding `app_*`, `draft_*` and `conn_*` documents.

use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::model::{Application, Namespace};
use crate::report::{ItemKind, RunReport};
use crate::utils::errors::{BackupError, Result};

pub const NAMESPACES_FILE: &str = "namespaces.json";

/// Kind of a per-namespace document, derived from its file name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Application,
    Draft,
    Connection,
}

impl DocumentKind {
    pub fn file_prefix(self) -> &'static str {
        match self {
            DocumentKind::Application => "app_",
            DocumentKind::Draft => "draft_",
            DocumentKind::Connection => "conn_",
        }
    }

    /// Anything that is neither a connection nor a draft is a deployed app,
    /// including export files that could not be normalized.
    pub fn classify(file_name: &str) -> Self {
        if file_name.starts_with(DocumentKind::Connection.file_prefix()) {
            DocumentKind::Connection
        } else if file_name.starts_with(DocumentKind::Draft.file_prefix()) {
            DocumentKind::Draft
        } else {
            DocumentKind::Application
        }
    }

    /// File name for a document of this kind called `name`.
    pub fn file_name(self, name: &str) -> String {
        format!("{}{}.json", self.file_prefix(), safe_file_stem(name))
    }

    /// Resource name encoded in a staged file name.
    pub fn resource_name(self, file_name: &str) -> String {
        let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
        stem.strip_prefix(self.file_prefix())
            .unwrap_or(stem)
            .to_string()
    }
}

impl From<DocumentKind> for ItemKind {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Application => ItemKind::Application,
            DocumentKind::Draft => ItemKind::Draft,
            DocumentKind::Connection => ItemKind::Connection,
        }
    }
}

/// Keep a resource name from escaping its namespace directory.
pub fn safe_file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect();
    match stem.as_str() {
        "" | "." | ".." => format!("_{}", stem),
        _ => stem,
    }
}

/// Staged files of one namespace, grouped by kind and sorted by name.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NamespaceFiles {
    pub applications: Vec<PathBuf>,
    pub drafts: Vec<PathBuf>,
    pub connections: Vec<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct StagingStore {
    root: PathBuf,
}

impl StagingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Remove anything left over from an earlier run and recreate the root.
    pub fn reset(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.root.join(safe_file_stem(namespace))
    }

    pub fn ensure_namespace_dir(&self, namespace: &str) -> Result<PathBuf> {
        let dir = self.namespace_dir(namespace);
        if !dir.exists() {
            info!("Creating namespace directory: '{}'", namespace);
            fs::create_dir_all(&dir)?;
        }
        Ok(dir)
    }

    pub fn write_namespaces(&self, namespaces: &[Namespace]) -> Result<PathBuf> {
        let path = self.root.join(NAMESPACES_FILE);
        write_json(&path, namespaces)?;
        Ok(path)
    }

    /// `None` when the tree has no namespace list.
    pub fn read_namespaces(&self) -> Result<Option<Vec<Namespace>>> {
        let path = self.root.join(NAMESPACES_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        let namespaces =
            serde_json::from_str(&content).map_err(|e| BackupError::decode(&path, e))?;
        Ok(Some(namespaces))
    }

    pub fn document_path(&self, namespace: &str, kind: DocumentKind, name: &str) -> PathBuf {
        self.namespace_dir(namespace).join(kind.file_name(name))
    }

    pub fn write_document<T: Serialize + ?Sized>(
        &self,
        namespace: &str,
        kind: DocumentKind,
        name: &str,
        document: &T,
    ) -> Result<PathBuf> {
        self.ensure_namespace_dir(namespace)?;
        let path = self.document_path(namespace, kind, name);
        write_json(&path, document)?;
        Ok(path)
    }

    /// Classify the regular files of a namespace directory by prefix.
    /// A missing directory yields no files.
    pub fn namespace_files(&self, namespace: &str) -> Result<NamespaceFiles> {
        let dir = self.namespace_dir(namespace);
        let mut files = NamespaceFiles::default();
        if !dir.is_dir() {
            warn!("Namespace directory '{}' does not exist", dir.display());
            return Ok(files);
        }

        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        for path in entries {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            match DocumentKind::classify(&file_name) {
                DocumentKind::Application => files.applications.push(path),
                DocumentKind::Draft => files.drafts.push(path),
                DocumentKind::Connection => files.connections.push(path),
            }
        }
        Ok(files)
    }

    /// Normalize the unpacked application export: decode each app's
    /// `configuration` string and rename the file to `app_<name>.json`.
    /// A file that cannot be decoded is recorded as failed and left as is.
    pub fn format_deployed_apps(&self, namespaces: &[Namespace], report: &mut RunReport) {
        info!("Formatting deployed applications");
        for namespace in namespaces {
            let dir = self.namespace_dir(&namespace.name);
            if !dir.is_dir() {
                warn!(
                    "Namespace directory '{}' does not exist. Skipping.",
                    dir.display()
                );
                continue;
            }

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) => {
                    error!("Failed to read '{}': {}", dir.display(), e);
                    continue;
                }
            };
            let mut paths: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            paths.sort();

            for path in paths {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string())
                    .unwrap_or_default();
                if stem.starts_with(DocumentKind::Application.file_prefix()) {
                    continue;
                }

                match format_app_file(&path, &dir.join(DocumentKind::Application.file_name(&stem)))
                {
                    Ok(()) => {
                        info!("Formatted application '{}' in '{}'", stem, namespace.name);
                        report.record_ok(ItemKind::Application, &namespace.name, &stem);
                    }
                    Err(e) => {
                        error!("Error processing file '{}': {}", path.display(), e);
                        report.record_failure(ItemKind::Application, &namespace.name, &stem, e);
                    }
                }
            }
        }
    }
}

fn format_app_file(path: &Path, formatted_path: &Path) -> Result<()> {
    let mut app: Application = read_json(path)?;
    match &app.configuration {
        Value::String(_) => app
            .decode_configuration()
            .map_err(|e| BackupError::decode(path, e))?,
        Value::Object(_) => {}
        _ => {
            return Err(BackupError::InvalidDocument {
                path: path.to_path_buf(),
                reason: "no JSON-encoded configuration".to_string(),
            })
        }
    }

    write_json(formatted_path, &app)?;
    if formatted_path != path {
        fs::remove_file(path)?;
    }
    Ok(())
}

pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_vec_pretty(value)?;
    fs::write(path, content)?;
    Ok(())
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read(path)?;
    serde_json::from_slice(&content).map_err(|e| BackupError::decode(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        assert_eq!(DocumentKind::classify("conn_bq.json"), DocumentKind::Connection);
        assert_eq!(DocumentKind::classify("draft_p1.json"), DocumentKind::Draft);
        assert_eq!(DocumentKind::classify("app_etl.json"), DocumentKind::Application);
        // unformatted export files are still apps
        assert_eq!(DocumentKind::classify("etl.json"), DocumentKind::Application);
    }

    #[test]
    fn test_file_names() {
        assert_eq!(DocumentKind::Draft.file_name("p1"), "draft_p1.json");
        assert_eq!(DocumentKind::Connection.file_name("a/b"), "conn_a_b.json");
        assert_eq!(DocumentKind::Draft.resource_name("draft_p1.json"), "p1");
        assert_eq!(safe_file_stem(".."), "_..");
    }

    #[test]
    fn test_namespaces_round_trip() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = StagingStore::new(temp_dir.path().join("stage"));
        store.reset()?;
        assert!(store.read_namespaces()?.is_none());

        let namespaces = vec![Namespace::new("ns2"), Namespace::new("ns1")];
        store.write_namespaces(&namespaces)?;
        assert_eq!(store.read_namespaces()?, Some(namespaces));
        Ok(())
    }

    #[test]
    fn test_reset_clears_previous_run() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = StagingStore::new(temp_dir.path().join("stage"));
        store.write_document("ns1", DocumentKind::Draft, "old", &json!({}))?;
        store.reset()?;
        assert_eq!(store.namespace_files("ns1")?, NamespaceFiles::default());
        Ok(())
    }

    #[test]
    fn test_namespace_files_grouping() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = StagingStore::new(temp_dir.path());
        store.write_document("ns1", DocumentKind::Draft, "p2", &json!({"id": "d2"}))?;
        store.write_document("ns1", DocumentKind::Draft, "p1", &json!({"id": "d1"}))?;
        store.write_document("ns1", DocumentKind::Connection, "c1", &json!({"name": "c1"}))?;
        store.write_document("ns1", DocumentKind::Application, "etl", &json!({"name": "etl"}))?;
        fs::write(store.namespace_dir("ns1").join("legacy.json"), b"{}")?;

        let files = store.namespace_files("ns1")?;
        assert_eq!(files.drafts.len(), 2);
        assert!(files.drafts[0].ends_with("draft_p1.json"));
        assert_eq!(files.connections.len(), 1);
        assert_eq!(files.applications.len(), 2);

        assert_eq!(store.namespace_files("missing")?, NamespaceFiles::default());
        Ok(())
    }

    #[test]
    fn test_format_deployed_apps_skips_bad_configuration() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let store = StagingStore::new(temp_dir.path());
        let ns_dir = store.ensure_namespace_dir("ns1")?;
        fs::write(
            ns_dir.join("etl.json"),
            serde_json::to_vec(&json!({
                "name": "etl",
                "configuration": "{\"stages\":[]}"
            }))?,
        )?;
        fs::write(
            ns_dir.join("broken.json"),
            serde_json::to_vec(&json!({
                "name": "broken",
                "configuration": "{stages"
            }))?,
        )?;

        let mut report = RunReport::new();
        store.format_deployed_apps(&[Namespace::new("ns1"), Namespace::new("absent")], &mut report);

        assert_eq!(report.succeeded(ItemKind::Application), 1);
        assert_eq!(report.failed(ItemKind::Application), 1);

        let formatted: Value = read_json(&ns_dir.join("app_etl.json"))?;
        assert_eq!(formatted["configuration"], json!({"stages": []}));
        assert!(!ns_dir.join("etl.json").exists());
        // the broken file stays in place, untouched
        assert!(ns_dir.join("broken.json").exists());
        Ok(())
    }
}
