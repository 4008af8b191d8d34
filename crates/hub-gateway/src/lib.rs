//! hub-gateway - MCP backend aggregation
//!
//! Presents many MCP backends as a single MCP server. Tools and prompts are
//! renamed into `<backend>__<name>`, resources keep their URIs, and every
//! call is routed back to the session that owns the name.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         GatewayServer                           │
//! │   initialize · ping · tools/* · prompts/* · resources/*         │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────▼─────────────────────────────────┐
//! │                            Router                               │
//! │  - fans listings out to every active backend                    │
//! │  - renames what comes back, rebuilds the routing snapshot       │
//! │  - dispatches calls by namespaced name or URI                   │
//! └───────────────────────────────┬─────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────▼─────────────────────────────────┐
//! │                         SessionCache                            │
//! │    one session per (backend id, transport fingerprint)          │
//! │           Establisher (retry) → ConnectionFactory               │
//! └──────────────┬──────────────────┬──────────────────┬────────────┘
//!                ▼                  ▼                  ▼
//!          stdio backend      stdio backend      HTTP backend
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use hub_gateway::{Collaborators, GatewayServer, McpConnector, Router, SessionCache};
//!
//! let sessions = Arc::new(SessionCache::new(Arc::new(McpConnector::default())));
//! let router = Router::new(sessions, registry, Collaborators::default());
//! let server = GatewayServer::new(Arc::new(router));
//!
//! if let Some(reply) = server.handle_line(&line).await {
//!     println!("{}", reply);
//! }
//! ```

pub mod router;
pub mod server;
pub mod session;
pub mod testing;

pub use router::{Collaborators, RouteEntry, Router, RoutingTable, SinkFailures};
pub use server::{GatewayServer, MethodContext, MethodRegistry, SERVER_NAME};
pub use session::{
    ConnectState, ConnectionFactory, Connector, Establisher, McpConnector, RetryPolicy, Session,
    SessionCache,
};

// Re-export core types for convenience
pub use hub_core::{GatewayError, GatewayResult};
