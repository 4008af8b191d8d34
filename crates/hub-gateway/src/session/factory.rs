//! Connection factory: descriptor in, unconnected client handle out

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use hub_client::transport::DEFAULT_REQUEST_TIMEOUT;
use hub_client::{
    McpClient, SseTransport, StdioConfig, StdioTransport, StreamableHttpTransport, Transport,
};
use hub_core::{BackendDescriptor, GatewayError, GatewayResult, TransportSpec};
use tracing::{debug, error};

#[cfg(windows)]
const INHERITED_ENV_VARS: &[&str] = &[
    "APPDATA",
    "HOMEDRIVE",
    "HOMEPATH",
    "LOCALAPPDATA",
    "PATH",
    "PROCESSOR_ARCHITECTURE",
    "SYSTEMDRIVE",
    "SYSTEMROOT",
    "TEMP",
    "USERNAME",
    "USERPROFILE",
];

#[cfg(not(windows))]
const INHERITED_ENV_VARS: &[&str] = &["HOME", "LOGNAME", "PATH", "SHELL", "TERM", "USER"];

/// The slice of the hub's own environment every child process receives
pub fn default_environment() -> BTreeMap<String, String> {
    INHERITED_ENV_VARS
        .iter()
        .filter_map(|key| {
            let value = std::env::var(key).ok()?;
            // Exported shell functions are not safe to pass on
            if value.starts_with("()") {
                return None;
            }
            Some((key.to_string(), value))
        })
        .collect()
}

/// A lone argument containing whitespace is split into separate arguments
fn normalize_args(args: &[String]) -> Vec<String> {
    match args {
        [single] if single.chars().any(char::is_whitespace) => {
            debug!(arg = %single, "Splitting single argument on whitespace");
            single.split_whitespace().map(str::to_string).collect()
        }
        _ => args.to_vec(),
    }
}

/// Builds transports and client handles; performs no I/O
#[derive(Debug, Clone)]
pub struct ConnectionFactory {
    request_timeout: Duration,
}

impl Default for ConnectionFactory {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ConnectionFactory {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }

    /// Build the transport for a descriptor
    pub fn transport(&self, descriptor: &BackendDescriptor) -> GatewayResult<Arc<dyn Transport>> {
        let unsupported = |reason: String| {
            error!(backend_id = %descriptor.id, reason = %reason, "Unsupported backend configuration");
            GatewayError::TransportUnsupported {
                backend_id: descriptor.id.clone(),
                reason,
            }
        };

        match &descriptor.transport {
            TransportSpec::Stdio { command, args, env } => {
                if command.trim().is_empty() {
                    return Err(unsupported("stdio backend has an empty command".into()));
                }

                let mut merged = default_environment();
                merged.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));

                let config = StdioConfig {
                    command: command.clone(),
                    args: normalize_args(args),
                    env: merged,
                    request_timeout: self.request_timeout,
                };
                debug!(backend_id = %descriptor.id, command = %config.command, args = ?config.args, "Creating stdio transport");
                Ok(Arc::new(StdioTransport::new(config)))
            }
            TransportSpec::StreamableHttp { url } => {
                if url.trim().is_empty() {
                    return Err(unsupported("stream backend is missing a URL".into()));
                }
                let transport = StreamableHttpTransport::with_timeout(url, self.request_timeout)
                    .map_err(|e| unsupported(e.to_string()))?;
                debug!(backend_id = %descriptor.id, url = %url, "Creating streamable HTTP transport");
                Ok(Arc::new(transport))
            }
            TransportSpec::Sse { url } => {
                if url.trim().is_empty() {
                    return Err(unsupported("SSE backend is missing a URL".into()));
                }
                let transport = SseTransport::with_timeout(url, self.request_timeout)
                    .map_err(|e| unsupported(e.to_string()))?;
                debug!(backend_id = %descriptor.id, url = %url, "Creating SSE transport");
                Ok(Arc::new(transport))
            }
        }
    }

    /// Build an unconnected client for a descriptor
    pub fn build(&self, descriptor: &BackendDescriptor) -> GatewayResult<McpClient> {
        Ok(McpClient::new(self.transport(descriptor)?))
    }
}
