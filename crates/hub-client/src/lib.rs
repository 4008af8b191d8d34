//! MCP client library for the hub
//!
//! Provides the client handle the gateway keeps per backend, and the
//! transports it runs over.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hub_client::{McpClient, StdioConfig, StdioTransport};
//! use hub_core::PaginatedParams;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = StdioTransport::new(StdioConfig::new("my-mcp-server"));
//!     let client = McpClient::new(Arc::new(transport));
//!     client.connect().await?;
//!
//!     let tools = client.list_tools(&PaginatedParams::default()).await?;
//!     println!("{} tools", tools.tools.len());
//!
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! [`transport::MockTransport`] answers from a per-method script and records
//! every message it receives.

mod client;
mod error;
pub mod transport;

pub use client::{client_capabilities, client_identity, ClientState, McpClient, CLIENT_NAME};
pub use error::{ClientError, Result};
pub use transport::{
    MockTransport, SseTransport, StdioConfig, StdioTransport, StreamableHttpTransport, Transport,
    TransportError,
};
