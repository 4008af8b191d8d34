//! Backend sessions: creation, handshake with retry, and caching
//!
//! ```text
//! SessionCache::get ──miss──▶ Connector ──▶ ConnectionFactory (no I/O)
//!                                       └─▶ Establisher (handshake, retry)
//! ```

mod cache;
mod establish;
mod factory;

pub use cache::SessionCache;
pub use establish::{ConnectState, Establisher, RetryPolicy};
pub use factory::{default_environment, ConnectionFactory};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use hub_client::McpClient;
use hub_core::{
    BackendDescriptor, CapabilityKind, GatewayResult, Implementation, ServerCapabilities,
    SessionKey,
};
use tracing::debug;

/// An established connection to one backend
pub struct Session {
    key: SessionKey,
    backend_id: String,
    name: String,
    client: McpClient,
    closed: AtomicBool,
}

impl Session {
    pub fn new(descriptor: &BackendDescriptor, client: McpClient) -> Self {
        Self {
            key: descriptor.session_key(),
            backend_id: descriptor.id.clone(),
            name: descriptor.name.clone(),
            client,
            closed: AtomicBool::new(false),
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn backend_id(&self) -> &str {
        &self.backend_id
    }

    /// Display name the backend was registered under when connected
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn client(&self) -> &McpClient {
        &self.client
    }

    pub fn server_info(&self) -> Option<Implementation> {
        self.client.server_info()
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        self.client.server_capabilities().unwrap_or_default()
    }

    /// Whether the backend declared the given capability family
    pub fn supports(&self, kind: CapabilityKind) -> bool {
        self.capabilities().supports(kind)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Tear down: transport first, then the client. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.client.transport().close().await {
            debug!(backend_id = %self.backend_id, error = %e, "Transport close failed");
        }
        if let Err(e) = self.client.close().await {
            debug!(backend_id = %self.backend_id, error = %e, "Client close failed");
        }
        debug!(backend_id = %self.backend_id, key = %self.key, "Session closed");
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Turns a descriptor into a live session
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, descriptor: &BackendDescriptor) -> GatewayResult<Arc<Session>>;
}

/// Production connector: factory, then handshake with retry
#[derive(Debug, Clone, Default)]
pub struct McpConnector {
    factory: ConnectionFactory,
    establisher: Establisher,
}

impl McpConnector {
    pub fn new(factory: ConnectionFactory, establisher: Establisher) -> Self {
        Self {
            factory,
            establisher,
        }
    }
}

#[async_trait]
impl Connector for McpConnector {
    async fn connect(&self, descriptor: &BackendDescriptor) -> GatewayResult<Arc<Session>> {
        let client = self.factory.build(descriptor)?;
        let session = self.establisher.establish(descriptor, client).await?;
        Ok(Arc::new(session))
    }
}
