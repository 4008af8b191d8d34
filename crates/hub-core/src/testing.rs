//! In-memory collaborators for tests
//!
//! Each fake records what it was asked so tests can assert on the side
//! effects of an aggregate or dispatch operation.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::collaborators::{
    BackendRegistry, FeatureFlags, GatewayFeature, InactiveFlagSet, InactiveTools, TelemetrySink,
    ToolLogSink, ToolReport,
};
use crate::descriptor::BackendDescriptor;
use crate::error::{GatewayError, GatewayResult};

/// Registry whose contents tests can swap at any time
#[derive(Default)]
pub struct MemoryRegistry {
    backends: Mutex<BTreeMap<String, BackendDescriptor>>,
    fail: Mutex<bool>,
    calls: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new<I: IntoIterator<Item = BackendDescriptor>>(backends: I) -> Self {
        let registry = Self::default();
        registry.set(backends);
        registry
    }

    /// Replace the whole registry
    pub fn set<I: IntoIterator<Item = BackendDescriptor>>(&self, backends: I) {
        *self.backends.lock() = backends.into_iter().map(|d| (d.id.clone(), d)).collect();
    }

    pub fn upsert(&self, descriptor: BackendDescriptor) {
        self.backends.lock().insert(descriptor.id.clone(), descriptor);
    }

    pub fn remove(&self, id: &str) {
        self.backends.lock().remove(id);
    }

    /// Make subsequent `list_backends` calls fail
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendRegistry for MemoryRegistry {
    async fn list_backends(
        &self,
        _force_refresh: bool,
    ) -> GatewayResult<BTreeMap<String, BackendDescriptor>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail.lock() {
            return Err(GatewayError::Collaborator("registry unavailable".into()));
        }
        Ok(self.backends.lock().clone())
    }
}

/// Feature flags and inactive tools under test control
#[derive(Default)]
pub struct MemoryFlags {
    features: Mutex<HashSet<GatewayFeature>>,
    inactive: Mutex<InactiveFlagSet>,
}

impl MemoryFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self, feature: GatewayFeature) {
        self.features.lock().insert(feature);
    }

    pub fn disable(&self, feature: GatewayFeature) {
        self.features.lock().remove(&feature);
    }

    pub fn deactivate(&self, backend_id: &str, tool_name: &str) {
        self.inactive.lock().insert(backend_id, tool_name);
    }

    pub fn reactivate_all(&self) {
        *self.inactive.lock() = InactiveFlagSet::new();
    }
}

#[async_trait]
impl FeatureFlags for MemoryFlags {
    async fn gateway_features(&self, _force_refresh: bool) -> HashSet<GatewayFeature> {
        self.features.lock().clone()
    }
}

#[async_trait]
impl InactiveTools for MemoryFlags {
    async fn inactive_tools(&self, _force_refresh: bool) -> GatewayResult<InactiveFlagSet> {
        Ok(self.inactive.lock().clone())
    }
}

/// Telemetry sink that keeps every report
#[derive(Default)]
pub struct RecordingTelemetry {
    reports: Mutex<Vec<ToolReport>>,
    fail: bool,
}

impl RecordingTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that records and then reports failure
    pub fn failing() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn reports(&self) -> Vec<ToolReport> {
        self.reports.lock().clone()
    }
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    async fn report_tools(&self, tools: Vec<ToolReport>) -> GatewayResult<()> {
        self.reports.lock().extend(tools);
        if self.fail {
            return Err(GatewayError::Collaborator("telemetry endpoint down".into()));
        }
        Ok(())
    }
}

/// Outcome of one recorded invocation log
#[derive(Debug, Clone, PartialEq)]
pub enum LogOutcome {
    Pending,
    Completed { result: Value, elapsed: Duration },
    Failed { message: String, elapsed: Duration },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub id: String,
    pub tool_name: String,
    pub backend_id: String,
    pub arguments: Value,
    pub outcome: LogOutcome,
}

/// Tool log sink backed by a vector
#[derive(Default)]
pub struct MemoryToolLog {
    records: Mutex<Vec<LogRecord>>,
    fail: bool,
}

impl MemoryToolLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every operation fails
    pub fn failing() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    fn finish(&self, log_id: &str, outcome: LogOutcome) -> GatewayResult<()> {
        if self.fail {
            return Err(GatewayError::Collaborator("log store down".into()));
        }
        let mut records = self.records.lock();
        let record = records
            .iter_mut()
            .find(|r| r.id == log_id)
            .ok_or_else(|| GatewayError::Collaborator(format!("no such log: {}", log_id)))?;
        record.outcome = outcome;
        Ok(())
    }
}

#[async_trait]
impl ToolLogSink for MemoryToolLog {
    async fn create_log(
        &self,
        tool_name: &str,
        backend_id: &str,
        arguments: &Value,
    ) -> GatewayResult<String> {
        if self.fail {
            return Err(GatewayError::Collaborator("log store down".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.records.lock().push(LogRecord {
            id: id.clone(),
            tool_name: tool_name.to_string(),
            backend_id: backend_id.to_string(),
            arguments: arguments.clone(),
            outcome: LogOutcome::Pending,
        });
        Ok(id)
    }

    async fn complete_log(
        &self,
        log_id: &str,
        result: &Value,
        elapsed: Duration,
    ) -> GatewayResult<()> {
        self.finish(
            log_id,
            LogOutcome::Completed {
                result: result.clone(),
                elapsed,
            },
        )
    }

    async fn fail_log(&self, log_id: &str, message: &str, elapsed: Duration) -> GatewayResult<()> {
        self.finish(
            log_id,
            LogOutcome::Failed {
                message: message.to_string(),
                elapsed,
            },
        )
    }
}

/// Poll `condition` every 10 ms until it holds or `timeout` elapses
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}
