//! Error types for client operations

use hub_core::{GatewayError, RpcError};
use thiserror::Error;

use crate::transport::TransportError;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur talking to one backend
#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend answered with a JSON-RPC error
    #[error("{0}")]
    Rpc(RpcError),

    /// Handshake has not completed (or the client was closed)
    #[error("Client not connected")]
    NotConnected,

    /// Backend reply did not have the expected shape
    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl From<ClientError> for GatewayError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Rpc(rpc) => GatewayError::Backend(rpc),
            other => GatewayError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_errors_become_backend_errors() {
        let err: GatewayError = ClientError::Rpc(RpcError::new(-32001, "quota")).into();
        assert!(matches!(err, GatewayError::Backend(ref e) if e.code == -32001));

        let err: GatewayError = ClientError::Transport(TransportError::ConnectionClosed).into();
        assert_eq!(err.to_string(), "Transport error: Connection closed");
    }
}
