//! Per-blob layout: every staged document is its own object.
//!
//! ```text
//! {prefix}/namespaces.json
//! {prefix}/{namespace}/pipelines/{name}.json
//! {prefix}/{namespace}/connections/{name}.json
//! {prefix}/{namespace}/apps/{name}.json
//! ```

use std::collections::HashSet;
use tracing::{info, warn};

use super::{join_key, ObjectStorage};
use crate::model::Namespace;
use crate::staging::{safe_file_stem, DocumentKind, StagingStore, NAMESPACES_FILE};
use crate::utils::errors::Result;

fn folder(kind: DocumentKind) -> &'static str {
    match kind {
        DocumentKind::Application => "apps",
        DocumentKind::Draft => "pipelines",
        DocumentKind::Connection => "connections",
    }
}

fn kind_for_folder(folder: &str) -> Option<DocumentKind> {
    match folder {
        "apps" => Some(DocumentKind::Application),
        "pipelines" => Some(DocumentKind::Draft),
        "connections" => Some(DocumentKind::Connection),
        _ => None,
    }
}

pub fn namespaces_key(prefix: &str) -> String {
    join_key(prefix, NAMESPACES_FILE)
}

fn namespace_prefix(prefix: &str, namespace: &str) -> String {
    join_key(prefix, &safe_file_stem(namespace))
}

pub fn document_key(prefix: &str, namespace: &str, kind: DocumentKind, name: &str) -> String {
    join_key(
        &namespace_prefix(prefix, namespace),
        &format!("{}/{}.json", folder(kind), safe_file_stem(name)),
    )
}

/// Split a key under a namespace prefix back into kind and resource name.
fn parse_document_key(namespace_prefix: &str, key: &str) -> Option<(DocumentKind, String)> {
    let rest = key.strip_prefix(namespace_prefix)?.strip_prefix('/')?;
    let (folder, file) = rest.split_once('/')?;
    let name = file.strip_suffix(".json")?;
    if name.contains('/') {
        return None;
    }
    Some((kind_for_folder(folder)?, name.to_string()))
}

/// Upload the staging tree blob by blob. Blobs of a namespace that were not
/// written by this run are removed, so the layout mirrors the last backup.
pub async fn publish(
    storage: &ObjectStorage,
    staging: &StagingStore,
    prefix: &str,
    namespaces: &[Namespace],
) -> Result<usize> {
    storage.put_json(&namespaces_key(prefix), namespaces).await?;
    let mut uploaded = 0usize;

    for namespace in namespaces {
        let files = staging.namespace_files(&namespace.name)?;
        let mut written = HashSet::new();

        for (kind, paths) in [
            (DocumentKind::Application, &files.applications),
            (DocumentKind::Draft, &files.drafts),
            (DocumentKind::Connection, &files.connections),
        ] {
            for path in paths {
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                let key = document_key(prefix, &namespace.name, kind, &kind.resource_name(&file_name));
                storage.put_bytes(&key, tokio::fs::read(path).await?).await?;
                written.insert(key);
                uploaded += 1;
            }
        }

        for key in storage.list(&namespace_prefix(prefix, &namespace.name)).await? {
            if !written.contains(&key) {
                info!("Removing stale blob '{}'", key);
                storage.delete(&key).await?;
            }
        }
    }

    info!("Uploaded {} documents to '{}/{}'", uploaded, storage.location(), prefix);
    Ok(uploaded)
}

/// Download the blobs into `staging` using the same tree layout as an
/// extracted archive. `None` when no namespace list is stored.
pub async fn materialize(
    storage: &ObjectStorage,
    prefix: &str,
    staging: &StagingStore,
) -> Result<Option<usize>> {
    let Some(namespaces) = storage.get_json::<Vec<Namespace>>(&namespaces_key(prefix)).await?
    else {
        return Ok(None);
    };

    staging.reset()?;
    staging.write_namespaces(&namespaces)?;
    let mut downloaded = 0usize;

    for namespace in &namespaces {
        let ns_prefix = namespace_prefix(prefix, &namespace.name);
        let dir = staging.ensure_namespace_dir(&namespace.name)?;

        for key in storage.list(&ns_prefix).await? {
            let Some((kind, name)) = parse_document_key(&ns_prefix, &key) else {
                warn!("Ignoring unexpected blob '{}'", key);
                continue;
            };
            if let Some(bytes) = storage.get_bytes(&key).await? {
                tokio::fs::write(dir.join(kind.file_name(&name)), &bytes).await?;
                downloaded += 1;
            }
        }
    }

    info!(
        "Downloaded {} documents from '{}/{}' to '{}'",
        downloaded,
        storage.location(),
        prefix,
        staging.root().display()
    );
    Ok(Some(downloaded))
}
