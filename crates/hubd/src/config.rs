//! Configuration file handling for hubd
//!
//! ```toml
//! [server]
//! transport = "stdio"          # or "http"
//! listen = "127.0.0.1:12006"   # http only
//! request_timeout_secs = 30
//!
//! [control_plane]
//! base_url = "http://localhost:12005"
//! api_key = "sk-..."
//! proxy_server_id = "hub-1"
//!
//! [retry]
//! max_attempts = 3
//! delay_ms = 2500
//!
//! # Used when no control plane is configured
//! features = ["TOOL_LOGS"]
//!
//! [backends.files]
//! name = "Files"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/srv"]
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::ValueEnum;
use hub_control::wire::ServerEntry;
use hub_control::DEFAULT_API_BASE_URL;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:12006";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Which front end serves callers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FrontEnd {
    #[default]
    Stdio,
    Http,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub transport: Option<FrontEnd>,
    pub listen: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControlPlaneSection {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub proxy_server_id: Option<String>,
    pub cache_ttl_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2500,
        }
    }
}

/// Contents of the hubd config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub server: ServerSection,
    pub control_plane: Option<ControlPlaneSection>,
    pub retry: RetrySection,
    pub features: Vec<String>,
    pub backends: BTreeMap<String, ServerEntry>,
}

impl HubConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(config)
    }
}

/// Values given on the command line or through the environment
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_key: Option<String>,
    pub api_base_url: Option<String>,
    pub proxy_server_id: Option<String>,
    pub transport: Option<FrontEnd>,
    pub listen: Option<String>,
}

/// Control-plane settings after merging
#[derive(Debug, Clone, PartialEq)]
pub struct ControlPlaneSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub proxy_server_id: Option<String>,
    pub cache_ttl: Option<Duration>,
}

/// Fully resolved configuration
#[derive(Debug, Clone)]
pub struct Settings {
    pub front_end: FrontEnd,
    pub listen: SocketAddr,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// `None` runs from the static backends in the config file
    pub control_plane: Option<ControlPlaneSettings>,
    pub features: Vec<String>,
    pub backends: BTreeMap<String, ServerEntry>,
}

impl HubConfig {
    /// Merge command-line values over file values.
    ///
    /// The control plane is used when an API key or a `[control_plane]`
    /// section is present; otherwise backends come from the file.
    pub fn merge(self, overrides: Overrides) -> Result<Settings, ConfigError> {
        let listen = overrides
            .listen
            .or(self.server.listen)
            .unwrap_or_else(|| DEFAULT_LISTEN.to_string());
        let listen: SocketAddr = listen
            .parse()
            .map_err(|e| ConfigError::Invalid(format!("listen address {}: {}", listen, e)))?;

        let section = self.control_plane;
        let api_key = overrides
            .api_key
            .or_else(|| section.as_ref().and_then(|s| s.api_key.clone()))
            .filter(|k| !k.is_empty());
        let control_plane = if api_key.is_some() || section.is_some() {
            let section = section.unwrap_or_default();
            Some(ControlPlaneSettings {
                base_url: overrides
                    .api_base_url
                    .or(section.base_url)
                    .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string()),
                api_key,
                proxy_server_id: overrides.proxy_server_id.or(section.proxy_server_id),
                cache_ttl: section.cache_ttl_ms.map(Duration::from_millis),
            })
        } else {
            None
        };

        Ok(Settings {
            front_end: overrides
                .transport
                .or(self.server.transport)
                .unwrap_or_default(),
            listen,
            request_timeout: Duration::from_secs(self.server.request_timeout_secs.unwrap_or(30)),
            max_attempts: self.retry.max_attempts,
            retry_delay: Duration::from_millis(self.retry.delay_ms),
            control_plane,
            features: self.features,
            backends: self.backends,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const FULL: &str = r#"
features = ["TOOL_LOGS"]

[server]
transport = "http"
listen = "0.0.0.0:9100"
request_timeout_secs = 5

[retry]
max_attempts = 5
delay_ms = 100

[backends.echo]
name = "Echo"
command = "echo-backend"
args = ["--name", "Echo"]
"#;

    #[test]
    fn empty_config_uses_defaults() {
        let settings = HubConfig::default().merge(Overrides::default()).unwrap();
        assert_eq!(settings.front_end, FrontEnd::Stdio);
        assert_eq!(settings.listen.to_string(), DEFAULT_LISTEN);
        assert_eq!(settings.request_timeout, Duration::from_secs(30));
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.retry_delay, Duration::from_millis(2500));
        assert!(settings.control_plane.is_none());
    }

    #[test]
    fn file_values_are_read() {
        let settings = HubConfig::from_toml_str(FULL)
            .unwrap()
            .merge(Overrides::default())
            .unwrap();
        assert_eq!(settings.front_end, FrontEnd::Http);
        assert_eq!(settings.listen.port(), 9100);
        assert_eq!(settings.request_timeout, Duration::from_secs(5));
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.features, vec!["TOOL_LOGS".to_string()]);
        assert_eq!(settings.backends["echo"].command.as_deref(), Some("echo-backend"));
    }

    #[test]
    fn arguments_override_the_file() {
        let overrides = Overrides {
            transport: Some(FrontEnd::Stdio),
            listen: Some("127.0.0.1:1".into()),
            api_key: Some("sk-1".into()),
            ..Default::default()
        };
        let settings = HubConfig::from_toml_str(FULL).unwrap().merge(overrides).unwrap();
        assert_eq!(settings.front_end, FrontEnd::Stdio);
        assert_eq!(settings.listen.port(), 1);
        assert_eq!(
            settings.control_plane,
            Some(ControlPlaneSettings {
                base_url: DEFAULT_API_BASE_URL.into(),
                api_key: Some("sk-1".into()),
                proxy_server_id: None,
                cache_ttl: None,
            })
        );
    }

    #[test]
    fn control_plane_section_enables_control_plane() {
        let config = HubConfig::from_toml_str(
            "[control_plane]\nbase_url = \"http://plane:1\"\nproxy_server_id = \"p\"\n",
        )
        .unwrap();
        let plane = config.merge(Overrides::default()).unwrap().control_plane.unwrap();
        assert_eq!(plane.base_url, "http://plane:1");
        assert_eq!(plane.proxy_server_id.as_deref(), Some("p"));
        assert!(plane.api_key.is_none());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(HubConfig::from_toml_str("[retry]\nmax_attempts = 0\n").is_err());
        assert!(HubConfig::from_toml_str("[server]\ntransport = \"carrier-pigeon\"\n").is_err());
        let bad_listen = Overrides {
            listen: Some("not an address".into()),
            ..Default::default()
        };
        assert!(HubConfig::default().merge(bad_listen).is_err());
    }

    #[test]
    fn load_reports_missing_files() {
        let err = HubConfig::load(Path::new("/nonexistent/hubd.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", FULL).unwrap();
        assert_eq!(HubConfig::load(file.path()).unwrap().backends.len(), 1);
    }
}
