//! Control-plane wire formats
//!
//! Responses are parsed leniently: one malformed entry is skipped with a
//! warning rather than failing the whole fetch.

use std::collections::{BTreeMap, HashSet};

use hub_core::{
    BackendDescriptor, BackendStatus, GatewayFeature, InactiveFlagSet, TransportSpec,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ControlPlaneError, Result};

/// One entry of `GET /api/mcp-servers`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// `STDIO` when absent
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl ServerEntry {
    pub fn into_descriptor(self) -> std::result::Result<BackendDescriptor, String> {
        let id = self
            .id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "entry has no id".to_string())?;

        let kind = self.kind.unwrap_or_else(|| "STDIO".into()).to_ascii_uppercase();
        let transport = match kind.as_str() {
            "STDIO" => TransportSpec::Stdio {
                command: self.command.unwrap_or_default(),
                args: self.args.unwrap_or_default(),
                env: self.env.unwrap_or_default(),
            },
            "SSE" | "STREAMABLE_HTTP" | "HTTP" => {
                let url = self
                    .url
                    .filter(|u| !u.trim().is_empty())
                    .ok_or_else(|| format!("{} server {} is missing url", kind, id))?;
                if kind == "SSE" {
                    TransportSpec::Sse { url }
                } else {
                    TransportSpec::StreamableHttp { url }
                }
            }
            other => return Err(format!("server {} has unknown type {}", id, other)),
        };

        let status = match self.status.as_deref() {
            Some(s) if s.eq_ignore_ascii_case("INACTIVE") => BackendStatus::Inactive,
            _ => BackendStatus::Active,
        };

        Ok(BackendDescriptor {
            name: self.name.unwrap_or_default(),
            description: self.description,
            transport,
            status,
            id,
        })
    }
}

/// Parse the server list into a registry keyed by backend id
pub fn parse_servers(body: Value) -> Result<BTreeMap<String, BackendDescriptor>> {
    let Value::Array(entries) = body else {
        return Err(ControlPlaneError::Parse(
            "expected an array of servers".into(),
        ));
    };

    let mut servers = BTreeMap::new();
    for raw in entries {
        let entry: ServerEntry = match serde_json::from_value(raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Skipping malformed server entry");
                continue;
            }
        };
        match entry.into_descriptor() {
            Ok(descriptor) => {
                servers.insert(descriptor.id.clone(), descriptor);
            }
            Err(reason) => warn!(reason = %reason, "Skipping server entry"),
        }
    }
    debug!(count = servers.len(), "Parsed backend registry");
    Ok(servers)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapabilitiesResponse {
    proxy_server_capabilities: Vec<String>,
}

/// Parse `GET /api/proxy-server-capabilities`; unknown flags are ignored
pub fn parse_features(body: Value) -> Result<HashSet<GatewayFeature>> {
    let response: CapabilitiesResponse =
        serde_json::from_value(body).map_err(|e| ControlPlaneError::Parse(e.to_string()))?;
    Ok(response
        .proxy_server_capabilities
        .iter()
        .filter_map(|flag| {
            let feature = GatewayFeature::parse(flag);
            if feature.is_none() {
                debug!(flag = %flag, "Ignoring unknown gateway feature");
            }
            feature
        })
        .collect())
}

#[derive(Debug, Deserialize)]
struct ToolEntry {
    name: String,
    mcp_server_id: String,
}

/// Parse `GET /api/tools?status=INACTIVE`, either `{"results": [...]}` or
/// a bare array
pub fn parse_inactive_tools(body: Value) -> Result<InactiveFlagSet> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(mut map) => match map.remove("results") {
            Some(Value::Array(entries)) => entries,
            _ => {
                return Err(ControlPlaneError::Parse(
                    "expected a results array of tools".into(),
                ))
            }
        },
        _ => return Err(ControlPlaneError::Parse("expected a list of tools".into())),
    };

    let mut inactive = InactiveFlagSet::new();
    for raw in entries {
        match serde_json::from_value::<ToolEntry>(raw) {
            Ok(tool) => inactive.insert(tool.mcp_server_id, tool.name),
            Err(e) => warn!(error = %e, "Skipping malformed tool entry"),
        }
    }
    Ok(inactive)
}

/// Body of `POST /api/tool-execution-logs`
#[derive(Debug, Serialize)]
pub struct CreateLogRequest<'a> {
    pub tool_name: &'a str,
    pub mcp_server_id: &'a str,
    pub payload: &'a Value,
    pub status: LogStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogStatus {
    Pending,
    Success,
    Error,
}

/// Body of `PUT /api/tool-execution-logs/{id}`
#[derive(Debug, Serialize)]
pub struct UpdateLogRequest<'a> {
    pub status: LogStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<&'a str>,
    pub execution_time_ms: u64,
}

/// Pull the new log id out of a create response (`{"id": ..}` or
/// `{"data": {"id": ..}}`, string or number)
pub fn parse_log_id(body: &Value) -> Result<String> {
    let id = body
        .get("id")
        .or_else(|| body.get("data").and_then(|d| d.get("id")));
    match id {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ControlPlaneError::Parse("log response has no id".into())),
    }
}
