//! Gateway server
//!
//! Front-end agnostic request handling: a method registry maps every MCP
//! method the hub serves to an async handler over the [`Router`]. The stdio
//! and HTTP front ends in `hubd` only move JSON-RPC messages in and out.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use hub_core::{
    error_codes, methods, CallToolParams, GatewayError, GatewayResult, GetPromptParams,
    Implementation, InitializeParams, InitializeResult, JsonRpcRequest, JsonRpcResponse,
    PaginatedParams, ReadResourceParams, RpcError, ServerCapabilities, PROTOCOL_VERSION,
    SUPPORTED_PROTOCOL_VERSIONS,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::router::Router;

/// Name the hub reports in its `initialize` result
pub const SERVER_NAME: &str = "mcp-hub";

/// Context passed to every method handler
pub struct MethodContext {
    pub method: String,
    pub params: Option<Value>,
    pub router: Arc<Router>,
}

impl MethodContext {
    /// Decode params into `T`; absent params decode from `{}`
    fn parse<T: DeserializeOwned>(&self) -> GatewayResult<T> {
        let params = self.params.clone().unwrap_or_else(|| json!({}));
        serde_json::from_value(params)
            .map_err(|e| GatewayError::InvalidParams(format!("{}: {}", self.method, e)))
    }
}

pub type MethodResult = GatewayResult<Value>;

/// A boxed async method handler
pub type HandlerFn =
    Box<dyn Fn(MethodContext) -> Pin<Box<dyn Future<Output = MethodResult> + Send>> + Send + Sync>;

fn to_value<T: Serialize>(value: T) -> MethodResult {
    serde_json::to_value(value).map_err(|e| GatewayError::Transport(e.to_string()))
}

/// The hub's own identity
pub fn server_identity() -> Implementation {
    Implementation::new(SERVER_NAME, env!("CARGO_PKG_VERSION"))
}

/// Pick the protocol version to answer `initialize` with
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == requested)
        .copied()
        .unwrap_or(PROTOCOL_VERSION)
}

/// Method name to handler
pub struct MethodRegistry {
    handlers: HashMap<String, HandlerFn>,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register_defaults();
        registry
    }

    pub fn register(&mut self, method: impl Into<String>, handler: HandlerFn) {
        self.handlers.insert(method.into(), handler);
    }

    pub fn contains(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(&self, ctx: MethodContext) -> Option<MethodResult> {
        let handler = self.handlers.get(&ctx.method)?;
        Some(handler(ctx).await)
    }

    fn register_defaults(&mut self) {
        // ── Session ──────────────────────────────────────────────────────

        self.register(
            methods::INITIALIZE,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: InitializeParams = ctx.parse()?;
                    info!(
                        client = %params.client_info.name,
                        client_version = %params.client_info.version,
                        protocol_version = %params.protocol_version,
                        "Client initializing"
                    );
                    to_value(InitializeResult {
                        protocol_version: negotiate_version(&params.protocol_version).to_string(),
                        capabilities: ServerCapabilities::hub(),
                        server_info: server_identity(),
                        instructions: None,
                    })
                })
            }),
        );
        self.register(
            methods::PING,
            Box::new(|_ctx| Box::pin(async move { Ok(json!({})) })),
        );

        // ── Aggregates ───────────────────────────────────────────────────

        self.register(
            methods::TOOLS_LIST,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: PaginatedParams = ctx.parse()?;
                    to_value(ctx.router.list_tools(&params).await?)
                })
            }),
        );
        self.register(
            methods::PROMPTS_LIST,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: PaginatedParams = ctx.parse()?;
                    to_value(ctx.router.list_prompts(&params).await?)
                })
            }),
        );
        self.register(
            methods::RESOURCES_LIST,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: PaginatedParams = ctx.parse()?;
                    to_value(ctx.router.list_resources(&params).await?)
                })
            }),
        );
        self.register(
            methods::RESOURCE_TEMPLATES_LIST,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: PaginatedParams = ctx.parse()?;
                    to_value(ctx.router.list_resource_templates(&params).await?)
                })
            }),
        );

        // ── Dispatch ─────────────────────────────────────────────────────

        self.register(
            methods::TOOLS_CALL,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: CallToolParams = ctx.parse()?;
                    ctx.router.call_tool(params).await
                })
            }),
        );
        self.register(
            methods::PROMPTS_GET,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: GetPromptParams = ctx.parse()?;
                    ctx.router.get_prompt(params).await
                })
            }),
        );
        self.register(
            methods::RESOURCES_READ,
            Box::new(|ctx| {
                Box::pin(async move {
                    let params: ReadResourceParams = ctx.parse()?;
                    ctx.router.read_resource(params).await
                })
            }),
        );
    }
}

/// The hub as seen by a caller: one JSON-RPC message in, at most one out
pub struct GatewayServer {
    router: Arc<Router>,
    methods: MethodRegistry,
}

impl GatewayServer {
    pub fn new(router: Arc<Router>) -> Self {
        Self {
            router,
            methods: MethodRegistry::new(),
        }
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn methods(&self) -> &MethodRegistry {
        &self.methods
    }

    /// Handle one decoded message.
    ///
    /// Notifications never produce a response.
    pub async fn handle_message(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "Notification received");
            return None;
        }

        let id = request.id.clone();
        let method = request.method.clone();
        let ctx = MethodContext {
            method: request.method,
            params: request.params,
            router: Arc::clone(&self.router),
        };

        let Some(outcome) = self.methods.dispatch(ctx).await else {
            warn!(method = %method, "Unknown method");
            return Some(JsonRpcResponse::failure(
                id,
                RpcError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", method),
                ),
            ));
        };

        Some(match outcome {
            Ok(result) => {
                debug!(method = %method, "Method ok");
                JsonRpcResponse::success(id, result)
            }
            Err(e) => {
                debug!(method = %method, code = e.rpc_code(), error = %e, "Method error");
                JsonRpcResponse::failure(id, e.into_rpc_error())
            }
        })
    }

    /// Handle one raw JSON-RPC value; a response comes back unless the
    /// value was a notification or a reply addressed to the hub
    pub async fn handle_value(&self, value: Value) -> Option<JsonRpcResponse> {
        if value.get("method").is_none() {
            if value.get("result").is_some() || value.get("error").is_some() {
                debug!("Ignoring response sent to the hub");
                return None;
            }
            return Some(invalid_request(value.get("id")));
        }
        match serde_json::from_value::<JsonRpcRequest>(value.clone()) {
            Ok(request) => self.handle_message(request).await,
            Err(e) => {
                debug!(error = %e, "Malformed request");
                Some(invalid_request(value.get("id")))
            }
        }
    }

    /// Handle one line of newline-delimited JSON-RPC
    pub async fn handle_line(&self, line: &str) -> Option<String> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let response = match serde_json::from_str::<Value>(line) {
            Ok(value) => self.handle_value(value).await?,
            Err(e) => JsonRpcResponse::failure(
                None,
                RpcError::new(error_codes::PARSE_ERROR, format!("Parse error: {}", e)),
            ),
        };
        match serde_json::to_string(&response) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                warn!(error = %e, "Could not encode response");
                None
            }
        }
    }

    /// Connect to every active backend ahead of the first request
    pub async fn init_sessions(&self) -> usize {
        let registry = Arc::clone(self.router.registry());
        self.router.sessions().init_all(registry.as_ref()).await
    }

    /// Close every backend session
    pub async fn shutdown(&self) {
        info!("Shutting down gateway");
        self.router.sessions().cleanup_all().await;
    }
}

fn invalid_request(id: Option<&Value>) -> JsonRpcResponse {
    let id = id.cloned().and_then(|id| serde_json::from_value(id).ok());
    JsonRpcResponse::failure(
        id,
        RpcError::new(error_codes::INVALID_REQUEST, "Invalid request"),
    )
}
