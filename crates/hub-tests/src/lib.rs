//! Integration tests for the MCP hub
//!
//! This crate holds the end-to-end tests plus the pieces they run against:
//!
//! - [`EchoBackend`]: a small MCP server with one tool, one prompt, one
//!   resource and one resource template
//! - `echo-backend`: that server as a stdio binary
//! - [`spawn_http_backend`]: the same server over streamable HTTP, in process
//! - [`spawn_sse_backend`]: the same server over the SSE protocol, in process
//! - [`gateway`]: a gateway wired with the production connector
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p hub-tests
//!
//! # The hubd end-to-end test needs the daemon built first
//! cargo build -p hubd && cargo test -p hub-tests --test hubd_e2e_test
//! ```
//!
//! # Test Structure
//!
//! - `gateway_stdio_test.rs` - gateway over real stdio child processes
//! - `gateway_http_test.rs` - gateway over the in-process HTTP and SSE backends
//! - `static_registry_test.rs` - gateway driven by a TOML backend file
//! - `hubd_e2e_test.rs` - the hubd binary with a static config

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use hub_core::testing::MemoryRegistry;
use hub_core::{
    error_codes, methods, BackendDescriptor, BackendRegistry, JsonRpcRequest, JsonRpcResponse,
    RpcError, PROTOCOL_VERSION,
};
use hub_gateway::{
    Collaborators, ConnectionFactory, Establisher, GatewayServer, McpConnector, RetryPolicy,
    Router, SessionCache,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

/// A scripted MCP server identified by `name`.
///
/// Its resources use the lowercased name as URI scheme, so two echo
/// backends never share a URI.
#[derive(Debug, Clone)]
pub struct EchoBackend {
    pub name: String,
    /// Answer `tools/list` with an internal error
    pub fail_tools_list: bool,
}

impl EchoBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fail_tools_list: false,
        }
    }

    pub fn failing_tools_list(mut self) -> Self {
        self.fail_tools_list = true;
        self
    }

    fn scheme(&self) -> String {
        self.name.to_lowercase()
    }

    /// Answer one message; notifications get no reply
    pub fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone()?;
        let params = request.params.unwrap_or_else(|| json!({}));
        let outcome = match request.method.as_str() {
            methods::INITIALIZE => Ok(json!({
                "protocolVersion": params["protocolVersion"].as_str().unwrap_or(PROTOCOL_VERSION),
                "capabilities": {"tools": {}, "prompts": {}, "resources": {}},
                "serverInfo": {"name": self.name, "version": "1.0.0"}
            })),
            methods::PING => Ok(json!({})),
            methods::TOOLS_LIST if self.fail_tools_list => Err(RpcError::new(
                error_codes::INTERNAL_ERROR,
                "tool listing is broken",
            )),
            methods::TOOLS_LIST => Ok(json!({"tools": [{
                "name": "echo",
                "description": "Echo the message back",
                "inputSchema": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }
            }]})),
            methods::TOOLS_CALL => self.call_tool(&params),
            methods::PROMPTS_LIST => Ok(json!({"prompts": [{
                "name": "greet",
                "description": "Greet someone",
                "arguments": [{"name": "who", "required": false}]
            }]})),
            methods::PROMPTS_GET => self.get_prompt(&params),
            methods::RESOURCES_LIST => Ok(json!({"resources": [{
                "uri": format!("{}://readme", self.scheme()),
                "name": "readme",
                "mimeType": "text/plain"
            }]})),
            methods::RESOURCES_READ => self.read_resource(&params),
            methods::RESOURCE_TEMPLATES_LIST => Ok(json!({"resourceTemplates": [{
                "uriTemplate": format!("{}://files/{{path}}", self.scheme()),
                "name": "files"
            }]})),
            other => Err(RpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(Some(id), result),
            Err(error) => JsonRpcResponse::failure(Some(id), error),
        })
    }

    fn call_tool(&self, params: &Value) -> Result<Value, RpcError> {
        if params["name"] != "echo" {
            return Err(RpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", params["name"]),
            ));
        }
        let message = params["arguments"]["message"].as_str().unwrap_or_default();
        Ok(json!({
            "content": [{"type": "text", "text": format!("{}: {}", self.name, message)}],
            "isError": false
        }))
    }

    fn get_prompt(&self, params: &Value) -> Result<Value, RpcError> {
        if params["name"] != "greet" {
            return Err(RpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown prompt: {}", params["name"]),
            ));
        }
        let who = params["arguments"]["who"].as_str().unwrap_or("world");
        Ok(json!({
            "messages": [{
                "role": "user",
                "content": {"type": "text", "text": format!("Hello, {} from {}", who, self.name)}
            }]
        }))
    }

    fn read_resource(&self, params: &Value) -> Result<Value, RpcError> {
        let uri = params["uri"].as_str().unwrap_or_default();
        if uri != format!("{}://readme", self.scheme()) {
            return Err(RpcError::new(
                error_codes::INVALID_PARAMS,
                format!("Unknown resource: {}", uri),
            ));
        }
        Ok(json!({
            "contents": [{"uri": uri, "mimeType": "text/plain", "text": format!("readme of {}", self.name)}]
        }))
    }
}

/// An [`EchoBackend`] listening for streamable HTTP on loopback
pub struct HttpBackend {
    pub addr: SocketAddr,
    task: tokio::task::JoinHandle<()>,
}

impl HttpBackend {
    pub fn url(&self) -> String {
        format!("http://{}/mcp", self.addr)
    }
}

impl Drop for HttpBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
struct HttpState {
    backend: Arc<EchoBackend>,
    session_id: Arc<String>,
}

async fn handle_http(State(state): State<HttpState>, Json(body): Json<Value>) -> Response {
    let Ok(request) = serde_json::from_value::<JsonRpcRequest>(body) else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&state.session_id) {
        headers.insert("mcp-session-id", value);
    }
    match state.backend.handle(request) {
        Some(reply) => (headers, Json(reply)).into_response(),
        None => (StatusCode::ACCEPTED, headers).into_response(),
    }
}

async fn end_session() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Serve `backend` on an ephemeral loopback port until the handle drops
pub async fn spawn_http_backend(backend: EchoBackend) -> std::io::Result<HttpBackend> {
    let state = HttpState {
        backend: Arc::new(backend),
        session_id: Arc::new(uuid::Uuid::new_v4().to_string()),
    };
    let app = axum::Router::new()
        .route("/mcp", post(handle_http).delete(end_session))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(error = %e, "HTTP backend stopped");
        }
    });
    Ok(HttpBackend { addr, task })
}

/// An [`EchoBackend`] speaking the SSE protocol on loopback: `GET /sse`
/// opens the event stream, `POST /messages?sessionId=..` carries requests
pub struct SseBackend {
    pub addr: SocketAddr,
    streams: Arc<Mutex<HashMap<String, mpsc::Sender<Event>>>>,
    task: tokio::task::JoinHandle<()>,
}

impl SseBackend {
    pub fn url(&self) -> String {
        format!("http://{}/sse", self.addr)
    }

    /// Event streams currently open
    pub fn open_streams(&self) -> usize {
        let mut streams = self.streams.lock();
        streams.retain(|_, tx| !tx.is_closed());
        streams.len()
    }
}

impl Drop for SseBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Clone)]
struct SseState {
    backend: Arc<EchoBackend>,
    streams: Arc<Mutex<HashMap<String, mpsc::Sender<Event>>>>,
}

async fn open_stream(State(state): State<SseState>) -> Response {
    let session_id = uuid::Uuid::new_v4().to_string();
    let (tx, rx) = mpsc::channel(32);
    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages?sessionId={}", session_id));
    if tx.try_send(endpoint).is_err() {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    state.streams.lock().insert(session_id, tx);

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    let stream = query
        .get("sessionId")
        .and_then(|id| state.streams.lock().get(id).cloned());
    let Some(tx) = stream else {
        return StatusCode::NOT_FOUND;
    };
    let Ok(request) = serde_json::from_value::<JsonRpcRequest>(body) else {
        return StatusCode::BAD_REQUEST;
    };
    if let Some(reply) = state.backend.handle(request) {
        let Ok(data) = serde_json::to_string(&reply) else {
            return StatusCode::INTERNAL_SERVER_ERROR;
        };
        if tx.send(Event::default().event("message").data(data)).await.is_err() {
            return StatusCode::GONE;
        }
    }
    StatusCode::ACCEPTED
}

/// Serve `backend` over SSE on an ephemeral loopback port until the handle
/// drops
pub async fn spawn_sse_backend(backend: EchoBackend) -> std::io::Result<SseBackend> {
    let streams = Arc::new(Mutex::new(HashMap::new()));
    let state = SseState {
        backend: Arc::new(backend),
        streams: Arc::clone(&streams),
    };
    let app = axum::Router::new()
        .route("/sse", get(open_stream))
        .route("/messages", post(post_message))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::warn!(error = %e, "SSE backend stopped");
        }
    });
    Ok(SseBackend {
        addr,
        streams,
        task,
    })
}

/// A gateway over `backends` using the production connector with a single
/// connect attempt
pub fn gateway(backends: Vec<BackendDescriptor>) -> (Arc<GatewayServer>, Arc<MemoryRegistry>) {
    gateway_with(backends, Collaborators::default())
}

pub fn gateway_with(
    backends: Vec<BackendDescriptor>,
    collaborators: Collaborators,
) -> (Arc<GatewayServer>, Arc<MemoryRegistry>) {
    let registry = Arc::new(MemoryRegistry::new(backends));
    (gateway_over(registry.clone(), collaborators), registry)
}

/// A gateway over any registry
pub fn gateway_over(
    registry: Arc<dyn BackendRegistry>,
    collaborators: Collaborators,
) -> Arc<GatewayServer> {
    let connector = McpConnector::new(
        ConnectionFactory::new(Duration::from_secs(10)),
        Establisher::new(RetryPolicy::new(1, Duration::ZERO)),
    );
    let sessions = Arc::new(SessionCache::new(Arc::new(connector)));
    let router = Router::new(sessions, registry, collaborators);
    Arc::new(GatewayServer::new(Arc::new(router)))
}

/// Send one request through the gateway and return the raw reply
pub async fn request(server: &GatewayServer, method: &str, params: Value) -> Value {
    let message = json!({"jsonrpc": "2.0", "id": 1, "method": method, "params": params});
    match server.handle_value(message).await {
        Some(reply) => serde_json::to_value(reply).unwrap_or(Value::Null),
        None => Value::Null,
    }
}

/// Names under `result.<field>[*].<key>`, sorted
pub fn sorted_names(reply: &Value, field: &str, key: &str) -> Vec<String> {
    let mut names: Vec<String> = reply["result"][field]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item[key].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}
