//! MCP client handle

use std::sync::Arc;

use hub_core::{
    methods, CallToolParams, GetPromptParams, Implementation, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedParams, ReadResourceParams, ServerCapabilities, PROTOCOL_VERSION,
};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::error::{ClientError, Result};
use crate::transport::Transport;

/// Name the hub introduces itself with to backends and callers
pub const CLIENT_NAME: &str = "mcp-hub";

/// Identity sent in every `initialize` request
pub fn client_identity() -> Implementation {
    Implementation::new(CLIENT_NAME, env!("CARGO_PKG_VERSION"))
}

/// Capabilities the hub declares to every backend
pub fn client_capabilities() -> Value {
    json!({
        "prompts": {},
        "resources": { "subscribe": true },
        "tools": {}
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Built but never connected
    Idle,
    /// Handshake complete
    Ready,
    Closed,
}

/// Client for one backend, running over any [`Transport`]
pub struct McpClient {
    transport: Arc<dyn Transport>,
    state: RwLock<ClientState>,
    server: RwLock<Option<InitializeResult>>,
}

impl std::fmt::Debug for McpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpClient")
            .field("transport", &self.transport.describe())
            .field("state", &self.state())
            .finish()
    }
}

impl McpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: RwLock::new(ClientState::Idle),
            server: RwLock::new(None),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> ClientState {
        *self.state.read()
    }

    /// Start the transport and perform the `initialize` handshake.
    ///
    /// May be called again after [`close`](Self::close) or a failed attempt.
    #[instrument(skip(self), fields(transport = %self.transport.describe()))]
    pub async fn connect(&self) -> Result<()> {
        self.transport.start().await?;

        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: client_capabilities(),
            client_info: client_identity(),
        };
        let result: InitializeResult = self
            .raw_request(methods::INITIALIZE, Some(encode(&params)?))
            .await
            .and_then(decode)?;

        self.transport.notify(methods::INITIALIZED, None).await?;

        debug!(
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "Backend handshake complete"
        );
        *self.server.write() = Some(result);
        *self.state.write() = ClientState::Ready;
        Ok(())
    }

    /// Mark closed and release the transport. Idempotent.
    ///
    /// The transport is closed on every call: a failed [`connect`](Self::connect)
    /// leaves the state untouched but may have started it.
    pub async fn close(&self) -> Result<()> {
        *self.state.write() = ClientState::Closed;
        self.transport.close().await?;
        Ok(())
    }

    /// Capabilities the backend declared during the handshake
    pub fn server_capabilities(&self) -> Option<ServerCapabilities> {
        self.server.read().as_ref().map(|s| s.capabilities.clone())
    }

    /// Name and version the backend reported
    pub fn server_info(&self) -> Option<Implementation> {
        self.server.read().as_ref().map(|s| s.server_info.clone())
    }

    /// Send a request on a connected client and return the raw result
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.state() != ClientState::Ready {
            return Err(ClientError::NotConnected);
        }
        self.raw_request(method, params).await
    }

    async fn raw_request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let response = self.transport.request(method, params).await?;
        response.into_result().map_err(ClientError::Rpc)
    }

    pub async fn list_tools(&self, params: &PaginatedParams) -> Result<ListToolsResult> {
        decode(self.request(methods::TOOLS_LIST, params.to_params()).await?)
    }

    pub async fn list_prompts(&self, params: &PaginatedParams) -> Result<ListPromptsResult> {
        decode(self.request(methods::PROMPTS_LIST, params.to_params()).await?)
    }

    pub async fn list_resources(&self, params: &PaginatedParams) -> Result<ListResourcesResult> {
        decode(self.request(methods::RESOURCES_LIST, params.to_params()).await?)
    }

    pub async fn list_resource_templates(
        &self,
        params: &PaginatedParams,
    ) -> Result<ListResourceTemplatesResult> {
        decode(
            self.request(methods::RESOURCE_TEMPLATES_LIST, params.to_params())
                .await?,
        )
    }

    /// Call a tool; the result is returned exactly as the backend sent it
    pub async fn call_tool(&self, params: &CallToolParams) -> Result<Value> {
        self.request(methods::TOOLS_CALL, Some(encode(params)?))
            .await
    }

    pub async fn get_prompt(&self, params: &GetPromptParams) -> Result<Value> {
        self.request(methods::PROMPTS_GET, Some(encode(params)?))
            .await
    }

    pub async fn read_resource(&self, params: &ReadResourceParams) -> Result<Value> {
        self.request(methods::RESOURCES_READ, Some(encode(params)?))
            .await
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ClientError::ParseError(e.to_string()))
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ClientError::ParseError(e.to_string()))
}
