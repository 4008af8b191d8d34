//! Backend registry read from a TOML file
//!
//! ```toml
//! features = ["TOOL_LOGS"]
//!
//! [backends.files]
//! name = "Files"
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/srv"]
//!
//! [backends.search]
//! name = "Search"
//! type = "STREAMABLE_HTTP"
//! url = "http://localhost:9000/mcp"
//! status = "INACTIVE"
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use hub_core::{BackendDescriptor, BackendRegistry, FeatureFlags, GatewayFeature, GatewayResult};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ControlPlaneError, Result};
use crate::wire::ServerEntry;

#[derive(Debug, Default, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    features: Vec<String>,
    #[serde(default)]
    backends: BTreeMap<String, ServerEntry>,
}

#[derive(Debug, Clone, Default)]
struct Contents {
    backends: BTreeMap<String, BackendDescriptor>,
    features: HashSet<GatewayFeature>,
}

impl Contents {
    fn from_tables(backends: BTreeMap<String, ServerEntry>, features: &[String]) -> Result<Self> {
        let mut parsed = BTreeMap::new();
        for (id, entry) in backends {
            let entry = ServerEntry {
                id: Some(id.clone()),
                ..entry
            };
            let descriptor = entry
                .into_descriptor()
                .map_err(|reason| ControlPlaneError::Config(format!("backend {}: {}", id, reason)))?;
            parsed.insert(id, descriptor);
        }

        let mut flags = HashSet::new();
        for flag in features {
            match GatewayFeature::parse(flag) {
                Some(feature) => {
                    flags.insert(feature);
                }
                None => warn!(flag = %flag, "Ignoring unknown feature in registry"),
            }
        }

        Ok(Self {
            backends: parsed,
            features: flags,
        })
    }
}

/// Registry and feature flags from local configuration.
///
/// When loaded from a file, a forced refresh re-reads it; a broken edit
/// keeps the last good contents.
pub struct StaticRegistry {
    path: Option<PathBuf>,
    contents: RwLock<Contents>,
}

impl StaticRegistry {
    pub fn new<I>(backends: I, features: impl IntoIterator<Item = GatewayFeature>) -> Self
    where
        I: IntoIterator<Item = BackendDescriptor>,
    {
        Self {
            path: None,
            contents: RwLock::new(Contents {
                backends: backends.into_iter().map(|d| (d.id.clone(), d)).collect(),
                features: features.into_iter().collect(),
            }),
        }
    }

    /// Build from already-parsed `[backends.<id>]` tables
    pub fn from_tables(backends: BTreeMap<String, ServerEntry>, features: &[String]) -> Result<Self> {
        Ok(Self {
            path: None,
            contents: RwLock::new(Contents::from_tables(backends, features)?),
        })
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(source)?;
        Self::from_tables(file.backends, &file.features)
    }

    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = Self::load(&path).await?;
        info!(path = %path.display(), backends = contents.backends.len(), "Loaded static registry");
        Ok(Self {
            path: Some(path),
            contents: RwLock::new(contents),
        })
    }

    async fn load(path: &Path) -> Result<Contents> {
        let source = tokio::fs::read_to_string(path).await?;
        let file: RegistryFile = toml::from_str(&source)?;
        Contents::from_tables(file.backends, &file.features)
    }

    async fn refresh(&self) {
        let Some(path) = &self.path else {
            return;
        };
        match Self::load(path).await {
            Ok(contents) => *self.contents.write() = contents,
            Err(e) => warn!(path = %path.display(), error = %e, "Registry reload failed, keeping previous backends"),
        }
    }

    pub fn len(&self) -> usize {
        self.contents.read().backends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BackendRegistry for StaticRegistry {
    async fn list_backends(
        &self,
        force_refresh: bool,
    ) -> GatewayResult<BTreeMap<String, BackendDescriptor>> {
        if force_refresh {
            self.refresh().await;
        }
        Ok(self.contents.read().backends.clone())
    }
}

#[async_trait]
impl FeatureFlags for StaticRegistry {
    async fn gateway_features(&self, _force_refresh: bool) -> HashSet<GatewayFeature> {
        self.contents.read().features.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_core::{BackendStatus, TransportSpec};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    const REGISTRY: &str = r#"
features = ["TOOLS_MANAGEMENT", "SOMETHING_ELSE"]

[backends.files]
name = "Files"
command = "npx"
args = ["-y", "server-filesystem"]

[backends.files.env]
ROOT = "/srv"

[backends.search]
name = "Search"
type = "STREAMABLE_HTTP"
url = "http://localhost:9000/mcp"
status = "INACTIVE"
"#;

    #[tokio::test]
    async fn parses_backends_and_features() {
        let registry = StaticRegistry::from_toml_str(REGISTRY).unwrap();
        let backends = registry.list_backends(false).await.unwrap();

        assert_eq!(backends.keys().collect::<Vec<_>>(), vec!["files", "search"]);
        assert_eq!(backends["files"].id, "files");
        match &backends["files"].transport {
            TransportSpec::Stdio { command, args, env } => {
                assert_eq!(command, "npx");
                assert_eq!(args.len(), 2);
                assert_eq!(env["ROOT"], "/srv");
            }
            other => panic!("unexpected transport {:?}", other),
        }
        assert_eq!(backends["search"].status, BackendStatus::Inactive);

        let features = registry.gateway_features(false).await;
        assert_eq!(features, HashSet::from([GatewayFeature::ToolsManagement]));
    }

    #[test]
    fn bad_backend_is_an_error() {
        let err = StaticRegistry::from_toml_str("[backends.web]\ntype = \"SSE\"\n").err();
        assert!(err.is_some());
    }

    #[tokio::test]
    async fn forced_refresh_rereads_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[backends.a]\nname = \"A\"\ncommand = \"a\"\n").unwrap();
        let registry = StaticRegistry::from_file(file.path()).await.unwrap();
        assert_eq!(registry.len(), 1);

        std::fs::write(
            file.path(),
            "[backends.a]\nname = \"A\"\ncommand = \"a\"\n[backends.b]\nname = \"B\"\ncommand = \"b\"\n",
        )
        .unwrap();
        assert_eq!(registry.list_backends(false).await.unwrap().len(), 1);
        assert_eq!(registry.list_backends(true).await.unwrap().len(), 2);

        std::fs::write(file.path(), "this is not toml [").unwrap();
        assert_eq!(registry.list_backends(true).await.unwrap().len(), 2);
    }
}
