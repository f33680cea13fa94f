//! Client for the cloud control plane's checkpoint API.

use crate::error::{ReporterError, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;

const AUTH_HEADER: &str = "x-auth-key";

/// Setup status of a cluster that is ready for checkpoints.
pub const SETUP_FINISHED: &str = "finish";

/// The two calls the reporter needs.
pub trait CheckpointApi: Send + Sync {
    fn cluster_info(&self, cluster_id: &str) -> impl Future<Output = Result<ClusterInfo>> + Send;

    /// Returns the id of the created checkpoint.
    fn create_checkpoint(
        &self,
        request: &CreateCheckpointRequest,
    ) -> impl Future<Output = Result<String>> + Send;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub setup_status: String,
    #[serde(default)]
    pub backup_size: Option<u64>,
}

impl ClusterInfo {
    pub fn is_ready(&self) -> bool {
        self.setup_status == SETUP_FINISHED
    }
}

#[derive(Deserialize)]
struct ClusterEnvelope {
    cluster: ClusterInfo,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateCheckpointRequest {
    pub auth_key: String,
    pub cluster_id: String,
    pub upload_status: String,
    pub upload_progress: u8,
    /// Unix epoch milliseconds
    pub checkpoint_time: i64,
    pub url: String,
    pub backup_size: u64,
    pub operator: String,
}

impl fmt::Debug for CreateCheckpointRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreateCheckpointRequest")
            .field("auth_key", &"***")
            .field("cluster_id", &self.cluster_id)
            .field("upload_status", &self.upload_status)
            .field("upload_progress", &self.upload_progress)
            .field("checkpoint_time", &self.checkpoint_time)
            .field("url", &self.url)
            .field("backup_size", &self.backup_size)
            .field("operator", &self.operator)
            .finish()
    }
}

#[derive(Deserialize)]
struct CreateCheckpointResponse {
    id: String,
}

/// reqwest-backed client.
pub struct CloudApiClient {
    client: reqwest::Client,
    base_url: Url,
    auth_key: String,
}

impl CloudApiClient {
    pub fn new(base_url: &str, auth_key: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ReporterError::Config(format!("invalid API URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(ReporterError::Config(format!(
                "API URL {} cannot have a path",
                base_url
            )));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            auth_key: auth_key.to_string(),
        })
    }

    /// `<base>/api/v1/<segments>`, each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                ReporterError::Config(format!("API URL {} cannot have a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["api", "v1"])
            .extend(segments);
        Ok(url)
    }
}

impl CheckpointApi for CloudApiClient {
    async fn cluster_info(&self, cluster_id: &str) -> Result<ClusterInfo> {
        let url = self.endpoint(&["clusters", cluster_id])?;
        let resp = self
            .client
            .get(url.clone())
            .header(AUTH_HEADER, &self.auth_key)
            .send()
            .await?;
        let envelope: ClusterEnvelope = ensure_success(&url, resp).await?.json().await?;
        Ok(envelope.cluster)
    }

    async fn create_checkpoint(&self, request: &CreateCheckpointRequest) -> Result<String> {
        let url = self.endpoint(&["checkpoints"])?;
        let resp = self
            .client
            .post(url.clone())
            .header(AUTH_HEADER, &self.auth_key)
            .json(request)
            .send()
            .await?;
        let created: CreateCheckpointResponse = ensure_success(&url, resp).await?.json().await?;
        Ok(created.id)
    }
}

async fn ensure_success(endpoint: &Url, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ReporterError::Api {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct FakeCloud {
        checkpoints: Arc<Mutex<Vec<Value>>>,
    }

    async fn get_cluster(
        Path(id): Path<String>,
        headers: HeaderMap,
    ) -> (StatusCode, Json<Value>) {
        if headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok()) != Some("secret") {
            return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "bad key" })));
        }
        match id.as_str() {
            "ready" => (
                StatusCode::OK,
                Json(json!({ "cluster": { "setup_status": "finish", "backup_size": 2048 } })),
            ),
            "pending" => (
                StatusCode::OK,
                Json(json!({ "cluster": { "setup_status": "creating" } })),
            ),
            "team/prod?x=1" => (
                StatusCode::OK,
                Json(json!({ "cluster": { "setup_status": "finish", "backup_size": 1 } })),
            ),
            _ => (StatusCode::NOT_FOUND, Json(json!({ "error": "no such cluster" }))),
        }
    }

    async fn create_checkpoint(
        State(cloud): State<FakeCloud>,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        if body["cluster_id"] == "broken" {
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": "boom" })));
        }
        let mut checkpoints = cloud.checkpoints.lock().unwrap();
        checkpoints.push(body);
        let id = format!("cp-{}", checkpoints.len());
        (StatusCode::CREATED, Json(json!({ "id": id })))
    }

    async fn serve(cloud: FakeCloud) -> String {
        let app = Router::new()
            .route("/api/v1/clusters/{id}", get(get_cluster))
            .route("/api/v1/checkpoints", post(create_checkpoint))
            .with_state(cloud);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    fn client(base: &str, key: &str) -> CloudApiClient {
        CloudApiClient::new(base, key, Duration::from_secs(5)).unwrap()
    }

    fn request(cluster_id: &str) -> CreateCheckpointRequest {
        CreateCheckpointRequest {
            auth_key: "secret".to_string(),
            cluster_id: cluster_id.to_string(),
            upload_status: "finish".to_string(),
            upload_progress: 100,
            checkpoint_time: 1_700_000_000_000,
            url: "s3://pcloud2021/backups".to_string(),
            backup_size: 2048,
            operator: "ops".to_string(),
        }
    }

    #[tokio::test]
    async fn test_cluster_info() {
        let base = serve(FakeCloud::default()).await;
        let api = client(&base, "secret");

        let ready = api.cluster_info("ready").await.unwrap();
        assert!(ready.is_ready());
        assert_eq!(ready.backup_size, Some(2048));

        let pending = api.cluster_info("pending").await.unwrap();
        assert!(!pending.is_ready());
        assert_eq!(pending.backup_size, None);
    }

    #[tokio::test]
    async fn test_cluster_id_is_one_path_segment() {
        let base = serve(FakeCloud::default()).await;
        let api = client(&base, "secret");

        let info = api.cluster_info("team/prod?x=1").await.unwrap();
        assert_eq!(info.backup_size, Some(1));

        let err = api.cluster_info("ready/../pending").await.unwrap_err();
        assert!(matches!(err, ReporterError::Api { status: 404, .. }), "{:?}", err);
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = client("https://cloud.example.com/tenant-a/", "secret");
        let url = api.endpoint(&["clusters", "c 1"]).unwrap();
        assert_eq!(
            url.as_str(),
            "https://cloud.example.com/tenant-a/api/v1/clusters/c%201"
        );
    }

    #[test]
    fn test_invalid_base_url_is_config_error() {
        for base in ["not a url", "mailto:ops@example.com"] {
            assert!(matches!(
                CloudApiClient::new(base, "secret", Duration::from_secs(5)),
                Err(ReporterError::Config(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_non_success_status_is_api_error() {
        let base = serve(FakeCloud::default()).await;

        let err = client(&base, "wrong").cluster_info("ready").await.unwrap_err();
        assert!(matches!(err, ReporterError::Api { status: 401, .. }), "{:?}", err);

        let err = client(&base, "secret").cluster_info("gone").await.unwrap_err();
        assert!(matches!(err, ReporterError::Api { status: 404, .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_create_checkpoint() {
        let cloud = FakeCloud::default();
        let base = serve(cloud.clone()).await;
        let api = client(&base, "secret");

        assert_eq!(api.create_checkpoint(&request("ready")).await.unwrap(), "cp-1");

        let stored = cloud.checkpoints.lock().unwrap().clone();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["upload_status"], "finish");
        assert_eq!(stored[0]["upload_progress"], 100);
        assert_eq!(stored[0]["checkpoint_time"], 1_700_000_000_000i64);
        assert_eq!(stored[0]["operator"], "ops");

        let err = api.create_checkpoint(&request("broken")).await.unwrap_err();
        assert!(matches!(err, ReporterError::Api { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_api_is_http_error() {
        let api = client("http://127.0.0.1:9", "secret");
        assert!(matches!(
            api.cluster_info("ready").await,
            Err(ReporterError::Http(_))
        ));
    }

    #[test]
    fn test_request_debug_hides_auth_key() {
        let shown = format!("{:?}", request("ready"));
        assert!(!shown.contains("secret"));
    }
}
