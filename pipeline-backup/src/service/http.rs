//! reqwest implementation of the pipeline-service API.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::PipelineService;
use crate::config::RetryConfig;
use crate::model::{Connection, DraftSummary, Namespace, PipelineDraft};
use crate::utils::errors::{BackupError, Result};

/// Path of the studio service that owns drafts and connections.
const STUDIO_PATH: [&str; 9] = [
    "v3",
    "namespaces",
    "system",
    "apps",
    "pipeline",
    "services",
    "studio",
    "methods",
    "v1",
];

/// HTTP client bound to one API root and one bearer token.
///
/// Built once per run and passed by reference to the orchestrators.
pub struct HttpPipelineClient {
    http: reqwest::Client,
    base_url: Url,
    token: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for HttpPipelineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPipelineClient")
            .field("base_url", &self.base_url.as_str())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HttpPipelineClient {
    pub fn new(base_url: &str, token: String, retry: RetryConfig) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackupError::Config(format!("invalid base_url '{}': {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackupError::Config(format!(
                "base_url '{}' cannot carry a path",
                base_url
            )));
        }

        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token,
            retry,
        })
    }

    /// Join path segments onto the API root, percent-encoding each one.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn studio_url(&self, namespace: &str, tail: &[&str]) -> Url {
        let mut segments: Vec<&str> = STUDIO_PATH.to_vec();
        segments.push("contexts");
        segments.push(namespace);
        segments.extend_from_slice(tail);
        self.url(&segments)
    }

    /// Send a request, retrying listed statuses when retries are enabled.
    async fn execute(&self, method: Method, url: Url, body: Option<&Value>) -> Result<Response> {
        let mut attempt = 0u32;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .bearer_auth(&self.token);
            if let Some(body) = body {
                request = request.json(body);
            }

            let can_retry = attempt < self.retry.max_retries;
            match request.send().await {
                Ok(resp)
                    if can_retry
                        && self.retry.status_forcelist.contains(&resp.status().as_u16()) =>
                {
                    warn!(
                        "{} {} returned {}, retrying ({}/{})",
                        method,
                        url,
                        resp.status(),
                        attempt + 1,
                        self.retry.max_retries
                    );
                }
                Ok(resp) => return check_status(resp).await,
                Err(e) if can_retry => {
                    warn!(
                        "{} {} failed: {}, retrying ({}/{})",
                        method,
                        url,
                        e,
                        attempt + 1,
                        self.retry.max_retries
                    );
                }
                Err(e) => return Err(e.into()),
            }

            let delay = self.retry.backoff_ms.saturating_mul(1 << attempt.min(16));
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        debug!("GET {}", url);
        let resp = self.execute(Method::GET, url, None).await?;
        Ok(resp.json::<T>().await?)
    }

    async fn put_json(&self, url: Url, body: &Value) -> Result<()> {
        debug!("PUT {}", url);
        self.execute(Method::PUT, url, Some(body)).await?;
        Ok(())
    }
}

async fn check_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(BackupError::Api {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl PipelineService for HttpPipelineClient {
    async fn list_namespaces(&self) -> Vec<Namespace> {
        match self.get_json(self.url(&["v3", "namespaces"])).await {
            Ok(namespaces) => namespaces,
            Err(e) => {
                error!("Failed to fetch namespaces: {}", e);
                Vec::new()
            }
        }
    }

    async fn list_pipeline_drafts(&self, namespace: &str) -> Vec<DraftSummary> {
        match self.get_json(self.studio_url(namespace, &["drafts"])).await {
            Ok(drafts) => drafts,
            Err(e) => {
                error!(namespace, "Failed to fetch pipelines: {}", e);
                Vec::new()
            }
        }
    }

    async fn fetch_pipeline_draft(&self, namespace: &str, id: &str) -> Option<PipelineDraft> {
        match self.get_json(self.studio_url(namespace, &["drafts", id])).await {
            Ok(draft) => Some(draft),
            Err(e) => {
                error!(namespace, draft_id = id, "Failed to fetch pipeline: {}", e);
                None
            }
        }
    }

    async fn list_connections(&self, namespace: &str) -> Vec<Connection> {
        match self.get_json(self.studio_url(namespace, &["connections"])).await {
            Ok(connections) => connections,
            Err(e) => {
                error!(namespace, "Failed to fetch connections: {}", e);
                Vec::new()
            }
        }
    }

    async fn export_applications(&self) -> Result<Bytes> {
        let url = self.url(&["v3", "export", "apps"]);
        debug!("GET {}", url);
        let resp = self.execute(Method::GET, url, None).await?;
        let bytes = resp.bytes().await?;
        info!("Downloaded application export ({} bytes)", bytes.len());
        Ok(bytes)
    }

    async fn create_namespace(&self, name: &str, payload: &Value) -> Result<()> {
        self.put_json(self.url(&["v3", "namespaces", name]), payload)
            .await
    }

    async fn upsert_application(
        &self,
        namespace: &str,
        name: &str,
        payload: &Value,
    ) -> Result<()> {
        self.put_json(self.url(&["v3", "namespaces", namespace, "apps", name]), payload)
            .await
    }

    async fn upsert_pipeline_draft(
        &self,
        namespace: &str,
        id: &str,
        payload: &Value,
    ) -> Result<()> {
        self.put_json(self.studio_url(namespace, &["drafts", id]), payload)
            .await
    }

    async fn upsert_connection(
        &self,
        namespace: &str,
        name: &str,
        payload: &Value,
    ) -> Result<()> {
        self.put_json(self.studio_url(namespace, &["connections", name]), payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    fn client(base: &str) -> HttpPipelineClient {
        HttpPipelineClient::new(base, "token".to_string(), RetryConfig::default()).unwrap()
    }

    fn retrying_client(base: &str, max_retries: u32) -> HttpPipelineClient {
        let retry = RetryConfig {
            max_retries,
            backoff_ms: 1,
            status_forcelist: vec![503],
        };
        HttpPipelineClient::new(base, "token".to_string(), retry).unwrap()
    }

    /// Local HTTP server answering one scripted `(status, body)` per
    /// connection. Returns the API root and the raw requests it received.
    async fn stub_server(responses: Vec<(u16, &'static str)>) -> (String, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let seen = requests.clone();
        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                let request = read_request(&mut socket).await;
                seen.lock().unwrap().push(request);
                let response = format!(
                    "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{}/api", addr), requests)
    }

    async fn read_request(socket: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        let head_end = loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break buf.len();
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8_lossy(&buf[..head_end]).to_lowercase();
        let content_length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    #[test]
    fn test_url_building() {
        let client = client("https://cdf.example.com/api/");
        assert_eq!(
            client.url(&["v3", "namespaces"]).as_str(),
            "https://cdf.example.com/api/v3/namespaces"
        );
        assert_eq!(
            client.url(&["v3", "namespaces", "ns1", "apps", "etl"]).as_str(),
            "https://cdf.example.com/api/v3/namespaces/ns1/apps/etl"
        );
    }

    #[test]
    fn test_studio_url() {
        let client = client("https://cdf.example.com/api");
        assert_eq!(
            client.studio_url("ns1", &["drafts", "d1"]).as_str(),
            "https://cdf.example.com/api/v3/namespaces/system/apps/pipeline/services/studio/methods/v1/contexts/ns1/drafts/d1"
        );
    }

    #[test]
    fn test_segments_are_encoded() {
        let client = client("https://cdf.example.com/api");
        assert_eq!(
            client.studio_url("ns1", &["connections", "my conn/1"]).as_str(),
            "https://cdf.example.com/api/v3/namespaces/system/apps/pipeline/services/studio/methods/v1/contexts/ns1/connections/my%20conn%2F1"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpPipelineClient::new("not a url", String::new(), RetryConfig::default()),
            Err(BackupError::Config(_))
        ));
        assert!(matches!(
            HttpPipelineClient::new("mailto:ops@example.com", String::new(), RetryConfig::default()),
            Err(BackupError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_reads_degrade_when_unreachable() {
        // nothing listens on port 9 (discard)
        let client = client("http://127.0.0.1:9/api");
        assert!(client.list_namespaces().await.is_empty());
        assert!(client.list_connections("ns1").await.is_empty());
        assert!(client.fetch_pipeline_draft("ns1", "d1").await.is_none());
        assert!(matches!(
            client.export_applications().await,
            Err(BackupError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_list_sends_bearer_token() {
        let (base, requests) = stub_server(vec![(200, r#"[{"name":"ns1"},{"name":"ns2"}]"#)]).await;
        let client = client(&base);

        let names: Vec<String> = client
            .list_namespaces()
            .await
            .into_iter()
            .map(|n| n.name)
            .collect();
        assert_eq!(names, vec!["ns1", "ns2"]);

        let requests = requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("GET /api/v3/namespaces HTTP/1.1"));
        assert!(requests[0].to_lowercase().contains("authorization: bearer token"));
    }

    #[tokio::test]
    async fn test_write_error_carries_status_and_body() {
        let (base, requests) = stub_server(vec![(409, "conflict")]).await;
        let client = client(&base);

        let result = client
            .upsert_connection("ns1", "c1", &json!({"name": "c1"}))
            .await;
        match result {
            Err(BackupError::Api { status, body }) => {
                assert_eq!(status, 409);
                assert_eq!(body, "conflict");
            }
            other => panic!("expected an API error, got {:?}", other),
        }

        let requests = requests.lock().unwrap();
        assert!(requests[0].starts_with(
            "PUT /api/v3/namespaces/system/apps/pipeline/services/studio/methods/v1/contexts/ns1/connections/c1 HTTP/1.1"
        ));
        assert!(requests[0].ends_with(r#"{"name":"c1"}"#));
    }

    #[tokio::test]
    async fn test_reads_degrade_on_error_status() {
        let (base, _) = stub_server(vec![(500, "boom"), (404, "missing"), (403, "denied")]).await;
        let client = client(&base);

        assert!(client.list_namespaces().await.is_empty());
        assert!(client.fetch_pipeline_draft("ns1", "d1").await.is_none());
        assert!(client.list_pipeline_drafts("ns1").await.is_empty());
    }

    #[tokio::test]
    async fn test_listed_status_is_retried() {
        let (base, requests) =
            stub_server(vec![(503, ""), (503, ""), (200, r#"[{"name":"ns1"}]"#)]).await;
        let client = retrying_client(&base, 2);

        assert_eq!(client.list_namespaces().await.len(), 1);
        assert_eq!(requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_unlisted_status_is_not_retried() {
        let (base, requests) = stub_server(vec![(404, "missing"), (200, "")]).await;
        let client = retrying_client(&base, 2);

        let result = client.create_namespace("ns1", &json!({"name": "ns1"})).await;
        assert!(matches!(result, Err(BackupError::Api { status: 404, .. })));
        assert_eq!(requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_status() {
        let (base, requests) = stub_server(vec![(503, "busy"), (503, "busy")]).await;
        let client = retrying_client(&base, 1);

        match client.export_applications().await {
            Err(BackupError::Api { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "busy");
            }
            other => panic!("expected an API error, got {:?}", other.map(|b| b.len())),
        }
        assert_eq!(requests.lock().unwrap().len(), 2);
    }
}
