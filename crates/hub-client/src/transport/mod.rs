//! Transport layer for talking to backends
//!
//! This module provides the connections a client handle runs over:
//! - Stdio transport: spawns a child process, newline-delimited JSON-RPC
//! - Streamable HTTP transport: POSTs JSON-RPC, reads JSON or SSE replies
//! - SSE transport: GET event stream plus POSTs to the announced endpoint
//! - Mock transport for testing
//!
//! All transports are lazy. Nothing is spawned or sent until
//! [`Transport::start`], and [`Transport::close`] may be called any number
//! of times. A closed transport can be started again.

pub mod error;
pub mod http;
pub mod legacy_sse;
pub mod mock;
pub mod sse;
pub mod stdio;

pub use error::TransportError;
pub use http::StreamableHttpTransport;
pub use legacy_sse::SseTransport;
pub use mock::MockTransport;
pub use stdio::{StdioConfig, StdioTransport};

use std::time::Duration;

use async_trait::async_trait;
use hub_core::{error_codes, methods, JsonRpcRequest, JsonRpcResponse, RpcError};
use serde_json::Value;

/// Default time to wait for a backend to answer one request
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One JSON-RPC connection to a backend
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the connection (spawn the process, prepare the HTTP session).
    ///
    /// Calling `start` on a running transport is a no-op.
    async fn start(&self) -> Result<(), TransportError>;

    /// Send a request and wait for its response
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<JsonRpcResponse, TransportError>;

    /// Send a notification; no response is expected
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError>;

    /// Release the connection. Idempotent.
    async fn close(&self) -> Result<(), TransportError>;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// Answer a request the backend sent to us. Only `ping` is supported.
pub(crate) fn reply_to_server_request(request: &JsonRpcRequest) -> JsonRpcResponse {
    if request.method == methods::PING {
        JsonRpcResponse::success(request.id.clone(), Value::Object(Default::default()))
    } else {
        JsonRpcResponse::failure(
            request.id.clone(),
            RpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not supported by client: {}", request.method),
            ),
        )
    }
}
