//! In-memory pipeline service used by the orchestrator tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

use super::PipelineService;
use crate::model::{Connection, DraftSummary, Namespace, PipelineDraft};
use crate::utils::errors::{BackupError, Result};

/// A write the orchestrator issued, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCall {
    CreateNamespace(String),
    UpsertApplication { namespace: String, name: String },
    UpsertDraft { namespace: String, id: String },
    UpsertConnection { namespace: String, name: String },
}

#[derive(Debug, Default)]
pub struct FakeState {
    pub namespaces: Vec<Value>,
    /// (namespace, draft id) -> draft document
    pub drafts: BTreeMap<(String, String), Value>,
    /// (namespace, connection name) -> connection document
    pub connections: BTreeMap<(String, String), Value>,
    /// (namespace, app name) -> app document
    pub apps: BTreeMap<(String, String), Value>,
    pub export: Option<Bytes>,
    /// Namespaces whose connection listing fails
    pub broken_connection_listing: HashSet<String>,
    /// (namespace, draft id) listed but not fetchable
    pub unfetchable_drafts: HashSet<(String, String)>,
    /// Write targets that fail, formatted as `kind:namespace/name`
    pub failing_writes: HashSet<String>,
    pub calls: Vec<WriteCall>,
}

#[derive(Debug, Default)]
pub struct FakeService {
    pub state: Mutex<FakeState>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .push(json!({ "name": name, "description": format!("{name} namespace") }));
        self
    }

    pub fn with_draft(self, namespace: &str, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().drafts.insert(
            (namespace.to_string(), id.to_string()),
            json!({ "id": id, "name": name, "config": { "stages": [] } }),
        );
        self
    }

    pub fn with_connection(self, namespace: &str, name: &str) -> Self {
        self.state.lock().unwrap().connections.insert(
            (namespace.to_string(), name.to_string()),
            json!({ "name": name, "connectionType": "BigQuery", "plugin": { "name": "bigquery" } }),
        );
        self
    }

    pub fn with_export(self, export: Vec<u8>) -> Self {
        self.state.lock().unwrap().export = Some(Bytes::from(export));
        self
    }

    pub fn fail_write(self, target: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .insert(target.to_string());
        self
    }

    pub fn break_connection_listing(self, namespace: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .broken_connection_listing
            .insert(namespace.to_string());
        self
    }

    pub fn break_draft_fetch(self, namespace: &str, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .unfetchable_drafts
            .insert((namespace.to_string(), id.to_string()));
        self
    }

    pub fn calls(&self) -> Vec<WriteCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn namespace_names(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .namespaces
            .iter()
            .filter_map(|n| n["name"].as_str().map(str::to_string))
            .collect()
    }

    pub fn draft_ids(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .drafts
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, id)| id.clone())
            .collect()
    }

    pub fn connection_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .connections
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    pub fn app_names(&self, namespace: &str) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .apps
            .keys()
            .filter(|(ns, _)| ns == namespace)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn record(&self, call: WriteCall, target: String) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if state.failing_writes.contains(&target) {
            return Err(BackupError::Api {
                status: 500,
                body: format!("injected failure for {target}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PipelineService for FakeService {
    async fn list_namespaces(&self) -> Vec<Namespace> {
        let state = self.state.lock().unwrap();
        state
            .namespaces
            .iter()
            .filter_map(|n| serde_json::from_value(n.clone()).ok())
            .collect()
    }

    async fn list_pipeline_drafts(&self, namespace: &str) -> Vec<DraftSummary> {
        let state = self.state.lock().unwrap();
        state
            .drafts
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter_map(|(_, doc)| {
                serde_json::from_value(json!({ "id": doc["id"], "name": doc["name"] })).ok()
            })
            .collect()
    }

    async fn fetch_pipeline_draft(&self, namespace: &str, id: &str) -> Option<PipelineDraft> {
        let state = self.state.lock().unwrap();
        let key = (namespace.to_string(), id.to_string());
        if state.unfetchable_drafts.contains(&key) {
            return None;
        }
        state
            .drafts
            .get(&key)
            .and_then(|doc| serde_json::from_value(doc.clone()).ok())
    }

    async fn list_connections(&self, namespace: &str) -> Vec<Connection> {
        let state = self.state.lock().unwrap();
        if state.broken_connection_listing.contains(namespace) {
            return Vec::new();
        }
        state
            .connections
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .filter_map(|(_, doc)| serde_json::from_value(doc.clone()).ok())
            .collect()
    }

    async fn export_applications(&self) -> Result<Bytes> {
        self.state
            .lock()
            .unwrap()
            .export
            .clone()
            .ok_or(BackupError::Api {
                status: 503,
                body: "export unavailable".to_string(),
            })
    }

    async fn create_namespace(&self, name: &str, payload: &Value) -> Result<()> {
        self.record(
            WriteCall::CreateNamespace(name.to_string()),
            format!("namespace:{name}"),
        )?;
        let mut state = self.state.lock().unwrap();
        state.namespaces.retain(|n| n["name"] != name);
        state.namespaces.push(payload.clone());
        Ok(())
    }

    async fn upsert_application(&self, namespace: &str, name: &str, payload: &Value) -> Result<()> {
        self.record(
            WriteCall::UpsertApplication {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            format!("app:{namespace}/{name}"),
        )?;
        self.state
            .lock()
            .unwrap()
            .apps
            .insert((namespace.to_string(), name.to_string()), payload.clone());
        Ok(())
    }

    async fn upsert_pipeline_draft(&self, namespace: &str, id: &str, payload: &Value) -> Result<()> {
        self.record(
            WriteCall::UpsertDraft {
                namespace: namespace.to_string(),
                id: id.to_string(),
            },
            format!("draft:{namespace}/{id}"),
        )?;
        self.state
            .lock()
            .unwrap()
            .drafts
            .insert((namespace.to_string(), id.to_string()), payload.clone());
        Ok(())
    }

    async fn upsert_connection(&self, namespace: &str, name: &str, payload: &Value) -> Result<()> {
        self.record(
            WriteCall::UpsertConnection {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            format!("conn:{namespace}/{name}"),
        )?;
        self.state
            .lock()
            .unwrap()
            .connections
            .insert((namespace.to_string(), name.to_string()), payload.clone());
        Ok(())
    }
}
