//! Gateway error taxonomy

use std::fmt;

use thiserror::Error;

use crate::protocol::{error_codes, RpcError};

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Which routing table a dispatch looked in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    Tool,
    Prompt,
    Resource,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetKind::Tool => "tool",
            TargetKind::Prompt => "prompt",
            TargetKind::Resource => "resource",
        };
        f.write_str(s)
    }
}

/// Errors surfaced by the gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Backend descriptor is missing fields its transport requires
    #[error("Unsupported transport for backend {backend_id}: {reason}")]
    TransportUnsupported { backend_id: String, reason: String },

    /// Connect retry budget exhausted
    #[error("Connection failed after {attempts} attempts: {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Dispatch to a name or URI the routing table does not know
    #[error("Unknown {kind}: {name}")]
    UnknownTarget { kind: TargetKind, name: String },

    /// Dispatch to a tool that has been administratively disabled
    #[error("Tool is inactive: {0}")]
    ToolDisabled(String),

    /// The backend's own protocol-level error, passed through unchanged
    #[error("{}", .0.message)]
    Backend(RpcError),

    /// Transport/communication failure talking to a backend
    #[error("Transport error: {0}")]
    Transport(String),

    /// A collaborator (registry, flag source, sink) failed
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Caller sent parameters the gateway cannot interpret
    #[error("Invalid params: {0}")]
    InvalidParams(String),
}

impl GatewayError {
    /// Returns the JSON-RPC error code for this error
    pub fn rpc_code(&self) -> i64 {
        match self {
            GatewayError::UnknownTarget { .. } => error_codes::INVALID_PARAMS,
            GatewayError::InvalidParams(_) => error_codes::INVALID_PARAMS,
            GatewayError::ToolDisabled(_) => error_codes::INVALID_REQUEST,
            GatewayError::Backend(err) => err.code,
            GatewayError::TransportUnsupported { .. }
            | GatewayError::ConnectFailed { .. }
            | GatewayError::Transport(_)
            | GatewayError::Collaborator(_) => error_codes::INTERNAL_ERROR,
        }
    }

    /// Convert into the JSON-RPC error object returned to the caller.
    ///
    /// Backend errors keep their original code, message and data.
    pub fn into_rpc_error(self) -> RpcError {
        match self {
            GatewayError::Backend(err) => err,
            other => RpcError {
                code: other.rpc_code(),
                message: other.to_string(),
                data: None,
            },
        }
    }

    pub fn unknown(kind: TargetKind, name: impl Into<String>) -> Self {
        Self::UnknownTarget {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_failed_message_includes_attempts() {
        let err = GatewayError::ConnectFailed {
            attempts: 3,
            source: "handshake refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "Connection failed after 3 attempts: handshake refused"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn backend_errors_pass_through() {
        let original = RpcError {
            code: -32042,
            message: "rate limited upstream".to_string(),
            data: Some(serde_json::json!({"retry_after": 5})),
        };
        let err = GatewayError::Backend(original.clone());
        assert_eq!(err.rpc_code(), -32042);
        assert_eq!(err.into_rpc_error(), original);
    }

    #[test]
    fn unknown_target_maps_to_invalid_params() {
        let err = GatewayError::unknown(TargetKind::Tool, "nope__missing");
        assert_eq!(err.to_string(), "Unknown tool: nope__missing");
        assert_eq!(err.rpc_code(), error_codes::INVALID_PARAMS);
    }
}
