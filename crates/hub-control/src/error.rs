//! Error types for control-plane operations

use hub_core::GatewayError;
use thiserror::Error;

/// Result type alias for control-plane operations
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Errors that can occur while talking to the control plane or loading a
/// static registry
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server returned an error response
    #[error("Control plane returned {status}: {message}")]
    Server { status: u16, message: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    Parse(String),

    /// Client configuration is unusable
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Static registry file could not be parsed
    #[error("Invalid registry file: {0}")]
    Toml(#[from] toml::de::Error),
}

impl ControlPlaneError {
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }
}

impl From<ControlPlaneError> for GatewayError {
    fn from(err: ControlPlaneError) -> Self {
        GatewayError::Collaborator(err.to_string())
    }
}
