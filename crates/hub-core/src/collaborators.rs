//! Narrow interfaces to the services the gateway depends on
//!
//! The router never talks HTTP to a control plane or reads config files
//! itself. It sees the backend registry, feature flags, the inactive-tool
//! list and the two best-effort sinks only through these traits, which
//! lets tests substitute in-memory fakes (see [`crate::testing`]).

use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::descriptor::BackendDescriptor;
use crate::error::GatewayResult;

/// Gateway-level features toggled by the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayFeature {
    /// Hide and refuse administratively inactive tools
    ToolsManagement,
    /// Record every tool invocation in the log sink
    ToolLogs,
}

impl GatewayFeature {
    /// Parse a control-plane flag string; unknown flags yield `None`
    pub fn parse(flag: &str) -> Option<Self> {
        match flag {
            "TOOLS_MANAGEMENT" => Some(Self::ToolsManagement),
            "TOOL_LOGS" => Some(Self::ToolLogs),
            _ => None,
        }
    }
}

/// Set of `(backend id, original tool name)` pairs marked inactive
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InactiveFlagSet {
    by_backend: HashMap<String, HashSet<String>>,
}

impl InactiveFlagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, backend_id: impl Into<String>, tool_name: impl Into<String>) {
        self.by_backend
            .entry(backend_id.into())
            .or_default()
            .insert(tool_name.into());
    }

    pub fn contains(&self, backend_id: &str, tool_name: &str) -> bool {
        self.by_backend
            .get(backend_id)
            .is_some_and(|tools| tools.contains(tool_name))
    }

    /// Number of inactive pairs
    pub fn len(&self) -> usize {
        self.by_backend.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_backend.values().all(HashSet::is_empty)
    }
}

impl<B: Into<String>, T: Into<String>> FromIterator<(B, T)> for InactiveFlagSet {
    fn from_iter<I: IntoIterator<Item = (B, T)>>(iter: I) -> Self {
        let mut set = Self::new();
        for (b, t) in iter {
            set.insert(b, t);
        }
        set
    }
}

/// Tool metadata reported back to the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolReport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "toolSchema")]
    pub tool_schema: Value,
    #[serde(rename = "mcp_server_id")]
    pub backend_id: String,
}

/// Source of backend descriptors, keyed by backend id
#[async_trait]
pub trait BackendRegistry: Send + Sync {
    /// List all known backends.
    ///
    /// `force_refresh` asks the implementation to bypass any cache older
    /// than its own short TTL.
    async fn list_backends(
        &self,
        force_refresh: bool,
    ) -> GatewayResult<BTreeMap<String, BackendDescriptor>>;
}

/// Source of the gateway's own feature flags.
///
/// Infallible: a missing flag means the feature is off.
#[async_trait]
pub trait FeatureFlags: Send + Sync {
    async fn gateway_features(&self, force_refresh: bool) -> HashSet<GatewayFeature>;
}

#[async_trait]
pub trait InactiveTools: Send + Sync {
    async fn inactive_tools(&self, force_refresh: bool) -> GatewayResult<InactiveFlagSet>;
}

/// Best-effort sink for discovered tool metadata
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn report_tools(&self, tools: Vec<ToolReport>) -> GatewayResult<()>;
}

/// Best-effort sink for tool invocation logs
#[async_trait]
pub trait ToolLogSink: Send + Sync {
    /// Record a pending invocation and return its log id
    async fn create_log(
        &self,
        tool_name: &str,
        backend_id: &str,
        arguments: &Value,
    ) -> GatewayResult<String>;

    async fn complete_log(&self, log_id: &str, result: &Value, elapsed: Duration)
        -> GatewayResult<()>;

    async fn fail_log(&self, log_id: &str, message: &str, elapsed: Duration) -> GatewayResult<()>;
}

/// Stand-in for every optional collaborator: no features, nothing
/// inactive, sinks that discard.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disabled;

#[async_trait]
impl FeatureFlags for Disabled {
    async fn gateway_features(&self, _force_refresh: bool) -> HashSet<GatewayFeature> {
        HashSet::new()
    }
}

#[async_trait]
impl InactiveTools for Disabled {
    async fn inactive_tools(&self, _force_refresh: bool) -> GatewayResult<InactiveFlagSet> {
        Ok(InactiveFlagSet::new())
    }
}

#[async_trait]
impl TelemetrySink for Disabled {
    async fn report_tools(&self, _tools: Vec<ToolReport>) -> GatewayResult<()> {
        Ok(())
    }
}

#[async_trait]
impl ToolLogSink for Disabled {
    async fn create_log(&self, _: &str, _: &str, _: &Value) -> GatewayResult<String> {
        Ok(String::new())
    }

    async fn complete_log(&self, _: &str, _: &Value, _: Duration) -> GatewayResult<()> {
        Ok(())
    }

    async fn fail_log(&self, _: &str, _: &str, _: Duration) -> GatewayResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_flags_are_ignored() {
        assert_eq!(
            GatewayFeature::parse("TOOLS_MANAGEMENT"),
            Some(GatewayFeature::ToolsManagement)
        );
        assert_eq!(GatewayFeature::parse("TOOL_LOGS"), Some(GatewayFeature::ToolLogs));
        assert_eq!(GatewayFeature::parse("SOMETHING_NEW"), None);
    }

    #[test]
    fn inactive_set_lookup() {
        let set: InactiveFlagSet = [("a", "echo"), ("b", "write"), ("b", "read"), ("a", "echo")]
            .into_iter()
            .collect();
        assert!(set.contains("a", "echo"));
        assert!(set.contains("b", "read"));
        assert!(!set.contains("a", "write"));
        assert!(!set.contains("c", "echo"));
        assert_eq!(set.len(), 3);
        assert!(InactiveFlagSet::new().is_empty());
    }

    #[test]
    fn tool_report_wire_names() {
        let report = ToolReport {
            name: "echo".into(),
            description: None,
            tool_schema: serde_json::json!({"type": "object"}),
            backend_id: "a".into(),
        };
        let v = serde_json::to_value(&report).unwrap();
        assert_eq!(v["mcp_server_id"], "a");
        assert_eq!(v["toolSchema"]["type"], "object");
    }

    #[tokio::test]
    async fn disabled_collaborator_is_empty() {
        assert!(Disabled.gateway_features(true).await.is_empty());
        assert!(Disabled.inactive_tools(true).await.unwrap().is_empty());
    }
}
