//! Capability aggregator and router
//!
//! Aggregate operations fan a listing out to every active backend, rename
//! what comes back and rebuild the routing table. Dispatch operations look
//! a name up in the current table and forward the call to the owning
//! session with the original name restored.

mod aggregate;
mod dispatch;
mod table;

pub use table::{RouteEntry, RoutingTable};

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use hub_core::{
    BackendDescriptor, BackendRegistry, CapabilityKind, Disabled, FeatureFlags, GatewayResult,
    InactiveTools, TargetKind, TelemetrySink, ToolLogSink,
};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::session::{Session, SessionCache};

/// Optional collaborators; each defaults to [`Disabled`]
#[derive(Clone)]
pub struct Collaborators {
    pub features: Arc<dyn FeatureFlags>,
    pub inactive_tools: Arc<dyn InactiveTools>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub tool_logs: Arc<dyn ToolLogSink>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            features: Arc::new(Disabled),
            inactive_tools: Arc::new(Disabled),
            telemetry: Arc::new(Disabled),
            tool_logs: Arc::new(Disabled),
        }
    }
}

impl Collaborators {
    pub fn with_features(mut self, features: Arc<dyn FeatureFlags>) -> Self {
        self.features = features;
        self
    }

    pub fn with_inactive_tools(mut self, inactive: Arc<dyn InactiveTools>) -> Self {
        self.inactive_tools = inactive;
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn with_tool_logs(mut self, tool_logs: Arc<dyn ToolLogSink>) -> Self {
        self.tool_logs = tool_logs;
        self
    }
}

/// One backend's contribution to an aggregate call
pub(crate) struct Contribution<T> {
    pub descriptor: BackendDescriptor,
    pub session: Arc<Session>,
    pub result: T,
}

impl<T> Contribution<T> {
    /// Namespace for this backend's items.
    ///
    /// Prefers the registered display name, then the name the backend
    /// reported, then its id.
    pub fn namespace(&self) -> String {
        if !self.descriptor.name.trim().is_empty() {
            return self.descriptor.name.clone();
        }
        self.session
            .server_info()
            .map(|info| info.name)
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.descriptor.id.clone())
    }
}

/// Failures of the best-effort sinks since startup
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct SinkFailures {
    pub telemetry: u64,
    pub tool_logs: u64,
}

#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    telemetry: AtomicU64,
    tool_logs: AtomicU64,
}

impl SinkCounters {
    pub(crate) fn telemetry_failed(&self) {
        self.telemetry.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tool_log_failed(&self) {
        self.tool_logs.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SinkFailures {
        SinkFailures {
            telemetry: self.telemetry.load(Ordering::Relaxed),
            tool_logs: self.tool_logs.load(Ordering::Relaxed),
        }
    }
}

/// Routes every gateway request to the right backend session
pub struct Router {
    sessions: Arc<SessionCache>,
    registry: Arc<dyn BackendRegistry>,
    collaborators: Collaborators,
    table: RwLock<Arc<RoutingTable>>,
    sink_counters: Arc<SinkCounters>,
}

impl Router {
    pub fn new(
        sessions: Arc<SessionCache>,
        registry: Arc<dyn BackendRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            sessions,
            registry,
            collaborators,
            table: RwLock::new(Arc::new(RoutingTable::default())),
            sink_counters: Arc::new(SinkCounters::default()),
        }
    }

    /// Telemetry and tool-log failures so far
    pub fn sink_failures(&self) -> SinkFailures {
        self.sink_counters.snapshot()
    }

    pub fn sessions(&self) -> &Arc<SessionCache> {
        &self.sessions
    }

    pub fn registry(&self) -> &Arc<dyn BackendRegistry> {
        &self.registry
    }

    /// Current routing snapshot
    pub fn snapshot(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.table.read())
    }

    /// Swap in the result of one aggregation pass
    fn commit(
        &self,
        kind: TargetKind,
        entries: Vec<(String, RouteEntry)>,
        registry: &BTreeMap<String, BackendDescriptor>,
        inactive: Option<HashSet<String>>,
    ) {
        let mut table = self.table.write();
        let next = table.rebuilt(kind, entries, registry, inactive);
        *table = Arc::new(next);
    }

    /// Force-refresh the registry
    async fn backends(&self) -> GatewayResult<BTreeMap<String, BackendDescriptor>> {
        self.registry.list_backends(true).await
    }

    /// Run `op` against every active backend that has (or can get) a
    /// session declaring `kind`.
    ///
    /// Waits for all backends; failures are logged and dropped. Results
    /// keep registry order.
    async fn fan_out<T, F, Fut>(
        &self,
        backends: &BTreeMap<String, BackendDescriptor>,
        kind: CapabilityKind,
        op: F,
    ) -> Vec<Contribution<T>>
    where
        F: Fn(Arc<Session>) -> Fut,
        Fut: Future<Output = GatewayResult<T>>,
    {
        let op = &op;
        let calls = backends.values().filter(|d| d.is_active()).map(|descriptor| async move {
            let session = self.sessions.session_for(descriptor).await?;
            if !session.supports(kind) {
                debug!(backend_id = %descriptor.id, ?kind, "Backend does not declare capability, skipping");
                return None;
            }
            match op(Arc::clone(&session)).await {
                Ok(result) => Some(Contribution {
                    descriptor: descriptor.clone(),
                    session,
                    result,
                }),
                Err(e) => {
                    warn!(backend_id = %descriptor.id, name = %descriptor.name, ?kind, error = %e, "Backend listing failed");
                    None
                }
            }
        });

        join_all(calls).await.into_iter().flatten().collect()
    }
}
