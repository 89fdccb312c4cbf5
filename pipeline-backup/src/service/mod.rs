//! Pipeline-service management API.
//!
//! Reads degrade to an empty or absent result (and log) so that one
//! inaccessible resource never blocks the rest of a backup. Writes and the
//! bulk export return errors so failures are attributable per item.

pub mod http;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::model::{Connection, DraftSummary, Namespace, PipelineDraft};
use crate::utils::errors::Result;

pub use http::HttpPipelineClient;

#[async_trait]
pub trait PipelineService: Send + Sync {
    async fn list_namespaces(&self) -> Vec<Namespace>;

    async fn list_pipeline_drafts(&self, namespace: &str) -> Vec<DraftSummary>;

    async fn fetch_pipeline_draft(&self, namespace: &str, id: &str) -> Option<PipelineDraft>;

    async fn list_connections(&self, namespace: &str) -> Vec<Connection>;

    /// Bulk export of every deployed application, as a zip byte stream.
    async fn export_applications(&self) -> Result<Bytes>;

    async fn create_namespace(&self, name: &str, payload: &Value) -> Result<()>;

    async fn upsert_application(&self, namespace: &str, name: &str, payload: &Value)
        -> Result<()>;

    async fn upsert_pipeline_draft(&self, namespace: &str, id: &str, payload: &Value)
        -> Result<()>;

    async fn upsert_connection(&self, namespace: &str, name: &str, payload: &Value)
        -> Result<()>;
}
