//! Backend descriptors and the session keys derived from them

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How to reach one backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportSpec {
    /// Child process speaking newline-delimited JSON-RPC on stdin/stdout
    #[serde(alias = "stdio")]
    Stdio {
        #[serde(default)]
        command: String,
        #[serde(default)]
        args: Vec<String>,
        /// Overrides layered over the default environment
        #[serde(default)]
        env: BTreeMap<String, String>,
    },
    /// Streamable HTTP endpoint: every message is a POST
    #[serde(alias = "streamable_http", alias = "HTTP", alias = "http")]
    StreamableHttp {
        #[serde(default)]
        url: String,
    },
    /// Event stream opened with GET; messages are POSTed to the endpoint it announces
    #[serde(alias = "sse")]
    Sse {
        #[serde(default)]
        url: String,
    },
}

impl TransportSpec {
    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            TransportSpec::Stdio { .. } => "stdio",
            TransportSpec::StreamableHttp { .. } => "streamable-http",
            TransportSpec::Sse { .. } => "sse",
        }
    }
}

/// Administrative status of a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendStatus {
    #[default]
    #[serde(alias = "active")]
    Active,
    #[serde(alias = "inactive")]
    Inactive,
}

/// Immutable description of one downstream server, as supplied by a registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    pub id: String,
    /// Display name; also the namespace prefix for this backend's names
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub transport: TransportSpec,
    #[serde(default)]
    pub status: BackendStatus,
}

impl BackendDescriptor {
    pub fn stdio(id: impl Into<String>, name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            transport: TransportSpec::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: BTreeMap::new(),
            },
            status: BackendStatus::Active,
        }
    }

    pub fn streamable_http(
        id: impl Into<String>,
        name: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            transport: TransportSpec::StreamableHttp { url: url.into() },
            status: BackendStatus::Active,
        }
    }

    pub fn sse(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            transport: TransportSpec::Sse { url: url.into() },
            status: BackendStatus::Active,
        }
    }

    /// Builder-style argument list for stdio descriptors
    pub fn with_args<I, S>(mut self, new_args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let TransportSpec::Stdio { args, .. } = &mut self.transport {
            *args = new_args.into_iter().map(Into::into).collect();
        }
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportSpec::Stdio { env, .. } = &mut self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_status(mut self, status: BackendStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == BackendStatus::Active
    }

    /// Cache key for this descriptor's current configuration
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(&self.id, &self.transport)
    }
}

/// Backend identity plus a fingerprint of its transport configuration.
///
/// Two descriptors with the same id and transport yield equal keys; any
/// transport change yields a different fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey {
    pub id: String,
    pub fingerprint: String,
}

impl SessionKey {
    pub fn new(id: &str, transport: &TransportSpec) -> Self {
        Self {
            id: id.to_string(),
            fingerprint: fingerprint(transport),
        }
    }

    /// Whether this key belongs to the given backend, under any configuration
    pub fn is_for(&self, id: &str) -> bool {
        self.id == id
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.id, &self.fingerprint[..self.fingerprint.len().min(12)])
    }
}

/// Hex SHA-256 over the canonical JSON encoding of a transport config.
///
/// Field order is fixed by the struct definitions and `env` is a
/// `BTreeMap`, so the encoding is stable across runs.
pub fn fingerprint(transport: &TransportSpec) -> String {
    let canonical = serde_json::to_vec(transport).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn same_config_same_key() {
        let a = BackendDescriptor::stdio("a", "A", "npx").with_args(["-y", "server"]);
        let b = BackendDescriptor::stdio("a", "Renamed", "npx").with_args(["-y", "server"]);
        assert_eq!(a.session_key(), b.session_key());
    }

    #[test]
    fn changed_config_changes_fingerprint() {
        let a = BackendDescriptor::stdio("a", "A", "npx").with_env("TOKEN", "1");
        let b = BackendDescriptor::stdio("a", "A", "npx").with_env("TOKEN", "2");
        let (ka, kb) = (a.session_key(), b.session_key());
        assert_eq!(ka.id, kb.id);
        assert_ne!(ka.fingerprint, kb.fingerprint);
        assert!(kb.is_for("a"));
    }

    #[test]
    fn env_order_does_not_matter() {
        let a = BackendDescriptor::stdio("a", "A", "x")
            .with_env("ONE", "1")
            .with_env("TWO", "2");
        let b = BackendDescriptor::stdio("a", "A", "x")
            .with_env("TWO", "2")
            .with_env("ONE", "1");
        assert_eq!(a.session_key(), b.session_key());
    }

    #[test]
    fn transport_type_spellings() {
        let sse: TransportSpec =
            serde_json::from_value(serde_json::json!({"type": "SSE", "url": "http://h/mcp"}))
                .unwrap();
        assert_eq!(
            sse,
            TransportSpec::Sse {
                url: "http://h/mcp".into()
            }
        );
        assert_eq!(sse.kind(), "sse");

        let streamable: TransportSpec = serde_json::from_value(
            serde_json::json!({"type": "STREAMABLE_HTTP", "url": "http://h/mcp"}),
        )
        .unwrap();
        assert_eq!(streamable.kind(), "streamable-http");
        assert_ne!(fingerprint(&sse), fingerprint(&streamable));

        let stdio: TransportSpec =
            serde_json::from_value(serde_json::json!({"type": "stdio", "command": "cat"})).unwrap();
        assert_eq!(stdio.kind(), "stdio");
    }

    #[test]
    fn status_defaults_to_active() {
        let d: BackendDescriptor = serde_json::from_value(serde_json::json!({
            "id": "a",
            "name": "A",
            "transport": {"type": "STDIO", "command": "cat"}
        }))
        .unwrap();
        assert!(d.is_active());
    }
}
