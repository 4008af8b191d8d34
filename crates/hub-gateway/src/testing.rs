//! Test utilities for hub-gateway
//!
//! [`ScriptedConnector`] connects descriptors to pre-registered
//! [`MockTransport`]s instead of spawning processes, while still running
//! the real handshake and retry logic.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hub_client::{McpClient, MockTransport};
use hub_core::testing::MemoryRegistry;
use hub_core::{methods, BackendDescriptor, GatewayError, GatewayResult};
use parking_lot::Mutex;
use serde_json::json;

use crate::router::{Collaborators, Router};
use crate::session::{Connector, Establisher, RetryPolicy, Session, SessionCache};

/// Connector backed by mock transports, keyed by backend id
pub struct ScriptedConnector {
    transports: HashMap<String, MockTransport>,
    establisher: Establisher,
    connects: Mutex<HashMap<String, usize>>,
    issued: Mutex<Vec<Arc<Session>>>,
    open_at_connect: Mutex<HashMap<String, Vec<usize>>>,
}

impl Default for ScriptedConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self {
            transports: HashMap::new(),
            establisher: Establisher::default(),
            connects: Mutex::new(HashMap::new()),
            issued: Mutex::new(Vec::new()),
            open_at_connect: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_backend(mut self, backend_id: &str, transport: MockTransport) -> Self {
        self.transports.insert(backend_id.to_string(), transport);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.establisher = Establisher::new(policy);
        self
    }

    /// The mock registered for a backend
    pub fn transport(&self, backend_id: &str) -> Option<&MockTransport> {
        self.transports.get(backend_id)
    }

    /// How many times `connect` was called for a backend
    pub fn connects(&self, backend_id: &str) -> usize {
        self.connects.lock().get(backend_id).copied().unwrap_or(0)
    }

    /// For each `connect` of a backend, how many sessions this connector
    /// had issued for it that were still open at that moment
    pub fn open_at_connect(&self, backend_id: &str) -> Vec<usize> {
        self.open_at_connect
            .lock()
            .get(backend_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(&self, descriptor: &BackendDescriptor) -> GatewayResult<Arc<Session>> {
        *self
            .connects
            .lock()
            .entry(descriptor.id.clone())
            .or_default() += 1;

        let open = self
            .issued
            .lock()
            .iter()
            .filter(|s| s.backend_id() == descriptor.id && !s.is_closed())
            .count();
        self.open_at_connect
            .lock()
            .entry(descriptor.id.clone())
            .or_default()
            .push(open);

        let transport = self.transports.get(&descriptor.id).cloned().ok_or_else(|| {
            GatewayError::TransportUnsupported {
                backend_id: descriptor.id.clone(),
                reason: "no scripted transport".into(),
            }
        })?;

        let client = McpClient::new(Arc::new(transport));
        let session = Arc::new(self.establisher.establish(descriptor, client).await?);
        self.issued.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

/// A mock backend exposing one tool (`echo`), one prompt (`greet`), one
/// resource (`<name>://readme`) and one resource template
pub fn mock_backend(name: &str) -> MockTransport {
    let scheme = name.to_lowercase();
    MockTransport::new(name)
        .on(
            methods::TOOLS_LIST,
            json!({"tools": [{
                "name": "echo",
                "description": "Echo text",
                "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
            }]}),
        )
        .on(
            methods::TOOLS_CALL,
            json!({"content": [{"type": "text", "text": format!("from {}", name)}]}),
        )
        .on(
            methods::PROMPTS_LIST,
            json!({"prompts": [{"name": "greet", "description": "Say hello"}]}),
        )
        .on(
            methods::PROMPTS_GET,
            json!({"messages": [{"role": "user", "content": {"type": "text", "text": "hello"}}]}),
        )
        .on(
            methods::RESOURCES_LIST,
            json!({"resources": [{"uri": format!("{}://readme", scheme), "name": "readme"}]}),
        )
        .on(
            methods::RESOURCES_READ,
            json!({"contents": [{"uri": format!("{}://readme", scheme), "text": "docs"}]}),
        )
        .on(
            methods::RESOURCE_TEMPLATES_LIST,
            json!({"resourceTemplates": [{"uriTemplate": format!("{}://files/{{path}}", scheme), "name": "files"}]}),
        )
}

/// Router over a scripted connector and an in-memory registry
pub fn router_with(
    connector: Arc<ScriptedConnector>,
    registry: Arc<MemoryRegistry>,
    collaborators: Collaborators,
) -> Router {
    let sessions = Arc::new(SessionCache::new(connector));
    Router::new(sessions, registry, collaborators)
}
