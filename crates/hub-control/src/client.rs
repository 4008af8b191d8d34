//! Control-plane HTTP client

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{
    BackendDescriptor, BackendRegistry, FeatureFlags, GatewayError, GatewayFeature,
    GatewayResult, InactiveFlagSet, InactiveTools, TelemetrySink, ToolLogSink, ToolReport,
};
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::cache::{TtlCache, DEFAULT_TTL};
use crate::error::{ControlPlaneError, Result};
use crate::wire::{self, CreateLogRequest, LogStatus, UpdateLogRequest};

/// Where the management API listens unless configured otherwise
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:12005";

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default connection timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

const PROXY_SERVER_PARAM: &str = "mcpProxyServerId";

/// Connection settings for [`ControlPlaneClient`]
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub base_url: String,
    /// Sent as `Authorization: Bearer <key>` when set
    pub api_key: Option<String>,
    /// Scopes registry and flag queries to one hub instance
    pub proxy_server_id: Option<String>,
    pub timeout: Duration,
    pub cache_ttl: Duration,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            api_key: None,
            proxy_server_id: None,
            timeout: DEFAULT_TIMEOUT,
            cache_ttl: DEFAULT_TTL,
        }
    }
}

impl ControlPlaneConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_proxy_server_id(mut self, id: impl Into<String>) -> Self {
        self.proxy_server_id = Some(id.into());
        self
    }
}

/// Management API client implementing every gateway collaborator.
///
/// Registry, flag and inactive-tool reads are cached for a short TTL and
/// fall back to the last good value when the API is unreachable.
pub struct ControlPlaneClient {
    client: Client,
    base_url: String,
    proxy_server_id: Option<String>,
    servers: TtlCache<BTreeMap<String, BackendDescriptor>>,
    features: TtlCache<HashSet<GatewayFeature>>,
    inactive: TtlCache<InactiveFlagSet>,
}

impl ControlPlaneClient {
    pub fn new(config: ControlPlaneConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(ControlPlaneError::Config(format!(
                "unsupported scheme in {}",
                config.base_url
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
            let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {}", key))
                .map_err(|e| ControlPlaneError::Config(format!("Invalid API key: {}", e)))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        } else {
            warn!("No control-plane API key configured, requests are unauthenticated");
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            proxy_server_id: config.proxy_server_id.filter(|id| !id.is_empty()),
            servers: TtlCache::new(config.cache_ttl),
            features: TtlCache::new(config.cache_ttl),
            inactive: TtlCache::new(config.cache_ttl),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{}", self.base_url, path))?)
    }

    fn scope_query(&self) -> Vec<(&'static str, String)> {
        self.proxy_server_id
            .iter()
            .map(|id| (PROXY_SERVER_PARAM, id.clone()))
            .collect()
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "GET");
        let response = self.client.get(url).query(query).send().await?;
        Self::read_json(response).await
    }

    async fn send_json<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<Value> {
        let url = self.endpoint(path)?;
        debug!(url = %url, %method, "Sending");
        let response = self.client.request(method, url).json(body).send().await?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        if !status.is_success() {
            return Err(Self::extract_error(response, status).await);
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| ControlPlaneError::Parse(e.to_string()))
    }

    async fn extract_error(response: reqwest::Response, status: StatusCode) -> ControlPlaneError {
        let message = match response.json::<Value>().await {
            Ok(body) => body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("HTTP {}", status)),
            Err(_) => format!("HTTP {}", status),
        };
        ControlPlaneError::server(status.as_u16(), message)
    }

    // =========================================================================
    // Uncached fetches
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn fetch_servers(&self) -> Result<BTreeMap<String, BackendDescriptor>> {
        let body = self.get_json("/api/mcp-servers", &self.scope_query()).await?;
        wire::parse_servers(body)
    }

    #[instrument(skip(self))]
    pub async fn fetch_features(&self) -> Result<HashSet<GatewayFeature>> {
        let body = self
            .get_json("/api/proxy-server-capabilities", &self.scope_query())
            .await?;
        wire::parse_features(body)
    }

    #[instrument(skip(self))]
    pub async fn fetch_inactive_tools(&self) -> Result<InactiveFlagSet> {
        let mut query = self.scope_query();
        query.push(("status", "INACTIVE".to_string()));
        let body = self.get_json("/api/tools", &query).await?;
        wire::parse_inactive_tools(body)
    }

    fn log_path(log_id: &str) -> String {
        format!("/api/tool-execution-logs/{}", log_id.replace('/', "%2F"))
    }

    async fn finish_log(&self, log_id: &str, update: UpdateLogRequest<'_>) -> GatewayResult<()> {
        self.send_json(Method::PUT, &Self::log_path(log_id), &update)
            .await?;
        Ok(())
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl BackendRegistry for ControlPlaneClient {
    async fn list_backends(
        &self,
        force_refresh: bool,
    ) -> GatewayResult<BTreeMap<String, BackendDescriptor>> {
        self.servers
            .get(force_refresh, || self.fetch_servers())
            .await
            .map_err(GatewayError::from)
    }
}

#[async_trait]
impl FeatureFlags for ControlPlaneClient {
    async fn gateway_features(&self, force_refresh: bool) -> HashSet<GatewayFeature> {
        self.features
            .get(force_refresh, || self.fetch_features())
            .await
            .unwrap_or_else(|e| {
                debug!(error = %e, "Feature flags unavailable, all features off");
                HashSet::new()
            })
    }
}

#[async_trait]
impl InactiveTools for ControlPlaneClient {
    async fn inactive_tools(&self, force_refresh: bool) -> GatewayResult<InactiveFlagSet> {
        match self
            .inactive
            .get(force_refresh, || self.fetch_inactive_tools())
            .await
        {
            Ok(inactive) => Ok(inactive),
            Err(e) => {
                warn!(error = %e, "Inactive tools unavailable, treating all tools as active");
                Ok(InactiveFlagSet::new())
            }
        }
    }
}

#[async_trait]
impl TelemetrySink for ControlPlaneClient {
    async fn report_tools(&self, tools: Vec<ToolReport>) -> GatewayResult<()> {
        if tools.is_empty() {
            return Ok(());
        }
        let count = tools.len();
        self.send_json(Method::POST, "/api/tools", &json!({ "tools": tools }))
            .await?;
        debug!(count, "Tools reported to control plane");
        Ok(())
    }
}

#[async_trait]
impl ToolLogSink for ControlPlaneClient {
    async fn create_log(
        &self,
        tool_name: &str,
        backend_id: &str,
        arguments: &Value,
    ) -> GatewayResult<String> {
        let request = CreateLogRequest {
            tool_name,
            mcp_server_id: backend_id,
            payload: arguments,
            status: LogStatus::Pending,
        };
        let body = self
            .send_json(Method::POST, "/api/tool-execution-logs", &request)
            .await?;
        Ok(wire::parse_log_id(&body)?)
    }

    async fn complete_log(
        &self,
        log_id: &str,
        result: &Value,
        elapsed: Duration,
    ) -> GatewayResult<()> {
        self.finish_log(
            log_id,
            UpdateLogRequest {
                status: LogStatus::Success,
                result: Some(result),
                error_message: None,
                execution_time_ms: millis(elapsed),
            },
        )
        .await
    }

    async fn fail_log(&self, log_id: &str, message: &str, elapsed: Duration) -> GatewayResult<()> {
        self.finish_log(
            log_id,
            UpdateLogRequest {
                status: LogStatus::Error,
                result: None,
                error_message: Some(message),
                execution_time_ms: millis(elapsed),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query, State};
    use axum::http::HeaderMap;
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use pretty_assertions::assert_eq;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Plane {
        server_hits: AtomicUsize,
        down: AtomicBool,
        auth: Mutex<Vec<String>>,
        scopes: Mutex<Vec<String>>,
        posted: Mutex<Vec<Value>>,
        updates: Mutex<Vec<(String, Value)>>,
    }

    async fn servers(
        State(plane): State<Arc<Plane>>,
        headers: HeaderMap,
        Query(query): Query<BTreeMap<String, String>>,
    ) -> (StatusCode, Json<Value>) {
        plane.server_hits.fetch_add(1, Ordering::SeqCst);
        if let Some(auth) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            plane.auth.lock().unwrap().push(auth.to_string());
        }
        if let Some(scope) = query.get(PROXY_SERVER_PARAM) {
            plane.scopes.lock().unwrap().push(scope.clone());
        }
        if plane.down.load(Ordering::SeqCst) {
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "maintenance"})),
            );
        }
        (
            StatusCode::OK,
            Json(json!([
                {"id": "a", "name": "A", "command": "echo-backend"},
                {"id": "b", "name": "B", "type": "SSE", "url": "http://127.0.0.1:1/mcp"}
            ])),
        )
    }

    async fn capabilities() -> Json<Value> {
        Json(json!({"proxyServerCapabilities": ["TOOL_LOGS"]}))
    }

    async fn tools(Query(query): Query<BTreeMap<String, String>>) -> Json<Value> {
        if query.get("status").map(String::as_str) != Some("INACTIVE") {
            return Json(json!({"results": []}));
        }
        Json(json!({"results": [{"name": "echo", "mcp_server_id": "a"}]}))
    }

    async fn report(State(plane): State<Arc<Plane>>, Json(body): Json<Value>) -> Json<Value> {
        plane.posted.lock().unwrap().push(body);
        Json(json!({"results": []}))
    }

    async fn create_log(State(plane): State<Arc<Plane>>, Json(body): Json<Value>) -> Json<Value> {
        plane.posted.lock().unwrap().push(body);
        Json(json!({"id": "log-1"}))
    }

    async fn update_log(
        State(plane): State<Arc<Plane>>,
        Path(id): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        plane.updates.lock().unwrap().push((id, body));
        Json(json!({"ok": true}))
    }

    async fn serve(plane: Arc<Plane>) -> SocketAddr {
        let app = Router::new()
            .route("/api/mcp-servers", get(servers))
            .route("/api/proxy-server-capabilities", get(capabilities))
            .route("/api/tools", get(tools).post(report))
            .route("/api/tool-execution-logs", post(create_log))
            .route("/api/tool-execution-logs/{id}", put(update_log))
            .with_state(plane);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn client(addr: SocketAddr, ttl: Duration) -> ControlPlaneClient {
        let config = ControlPlaneConfig {
            cache_ttl: ttl,
            ..ControlPlaneConfig::new(format!("http://{}/", addr))
                .with_api_key("sk-test")
                .with_proxy_server_id("hub-1")
        };
        ControlPlaneClient::new(config).unwrap()
    }

    #[test]
    fn rejects_bad_base_urls() {
        assert!(ControlPlaneClient::new(ControlPlaneConfig::new("not a url")).is_err());
        assert!(ControlPlaneClient::new(ControlPlaneConfig::new("ftp://host")).is_err());
        assert!(ControlPlaneClient::new(ControlPlaneConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn registry_is_scoped_and_authenticated() {
        let plane = Arc::new(Plane::default());
        let addr = serve(plane.clone()).await;
        let client = client(addr, Duration::from_secs(60));

        let backends = client.list_backends(true).await.unwrap();
        assert_eq!(backends.keys().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(backends["b"].transport.kind(), "sse");
        assert_eq!(*plane.auth.lock().unwrap(), vec!["Bearer sk-test".to_string()]);
        assert_eq!(*plane.scopes.lock().unwrap(), vec!["hub-1".to_string()]);
    }

    #[tokio::test]
    async fn registry_reads_are_cached() {
        let plane = Arc::new(Plane::default());
        let addr = serve(plane.clone()).await;
        let client = client(addr, Duration::from_secs(60));

        client.list_backends(true).await.unwrap();
        client.list_backends(true).await.unwrap();
        client.list_backends(false).await.unwrap();
        assert_eq!(plane.server_hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn outage_serves_last_registry() {
        let plane = Arc::new(Plane::default());
        let addr = serve(plane.clone()).await;
        let client = client(addr, Duration::ZERO);

        client.list_backends(true).await.unwrap();
        plane.down.store(true, Ordering::SeqCst);
        let backends = client.list_backends(true).await.unwrap();
        assert_eq!(backends.len(), 2);
        assert_eq!(plane.server_hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn outage_without_cache_fails_registry_but_not_flags() {
        let plane = Arc::new(Plane::default());
        plane.down.store(true, Ordering::SeqCst);
        let addr = serve(plane.clone()).await;
        let client = client(addr, Duration::ZERO);

        let err = client.list_backends(true).await.unwrap_err();
        assert!(err.to_string().contains("maintenance"));

        let unreachable = ControlPlaneClient::new(ControlPlaneConfig::new("http://127.0.0.1:9")).unwrap();
        assert!(unreachable.gateway_features(true).await.is_empty());
        assert!(unreachable.inactive_tools(true).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flags_and_inactive_tools() {
        let plane = Arc::new(Plane::default());
        let addr = serve(plane.clone()).await;
        let client = client(addr, Duration::from_secs(1));

        let features = client.gateway_features(true).await;
        assert_eq!(features, HashSet::from([GatewayFeature::ToolLogs]));
        let inactive = client.inactive_tools(true).await.unwrap();
        assert!(inactive.contains("a", "echo"));
    }

    #[tokio::test]
    async fn reports_and_logs_are_posted() {
        let plane = Arc::new(Plane::default());
        let addr = serve(plane.clone()).await;
        let client = client(addr, Duration::from_secs(1));

        client
            .report_tools(vec![ToolReport {
                name: "echo".into(),
                description: Some("Echo text".into()),
                tool_schema: json!({"type": "object"}),
                backend_id: "a".into(),
            }])
            .await
            .unwrap();
        client.report_tools(Vec::new()).await.unwrap();

        let id = client
            .create_log("echo", "a", &json!({"text": "hi"}))
            .await
            .unwrap();
        assert_eq!(id, "log-1");
        client
            .fail_log(&id, "boom", Duration::from_millis(42))
            .await
            .unwrap();

        let posted = plane.posted.lock().unwrap().clone();
        assert_eq!(posted.len(), 2);
        assert_eq!(posted[0]["tools"][0]["toolSchema"], json!({"type": "object"}));
        assert_eq!(posted[0]["tools"][0]["mcp_server_id"], "a");
        assert_eq!(
            posted[1],
            json!({"tool_name": "echo", "mcp_server_id": "a", "payload": {"text": "hi"}, "status": "PENDING"})
        );

        let updates = plane.updates.lock().unwrap().clone();
        assert_eq!(updates[0].0, "log-1");
        assert_eq!(
            updates[0].1,
            json!({"status": "ERROR", "error_message": "boom", "execution_time_ms": 42})
        );
    }
}
