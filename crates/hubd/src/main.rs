//! hubd - MCP hub daemon
//!
//! Serves every backend registered with the control plane (or listed in
//! the config file) as a single MCP server.
//!
//! Usage:
//!   hubd [OPTIONS]
//!
//! Examples:
//!   # Backends from the management API, served on stdio
//!   hubd --api-key sk-... --proxy-server-id hub-1
//!
//!   # Static backends from a file, served over HTTP
//!   hubd --config hubd.toml --transport http --listen 127.0.0.1:12006
//!
//! Logs go to stderr; stdout carries the protocol in stdio mode.

mod config;
mod http;
mod report;
mod stdio;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hub_control::{ControlPlaneClient, ControlPlaneConfig, StaticRegistry, TracingToolLog};
use hub_core::{BackendRegistry, TelemetrySink};
use hub_gateway::{
    Collaborators, ConnectionFactory, Establisher, GatewayServer, McpConnector, RetryPolicy,
    Router, SessionCache,
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{FrontEnd, HubConfig, Overrides, Settings};

const DEFAULT_FILTER: &str = "hubd=info,hub_gateway=info,hub_client=info,hub_control=info";

#[derive(Parser, Debug)]
#[command(name = "hubd")]
#[command(author, version, about = "Serve many MCP servers as one")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, env = "MCP_HUB_CONFIG")]
    config: Option<PathBuf>,

    /// Control-plane API key; enables the control plane
    #[arg(long, env = "MCP_HUB_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Control-plane base URL
    #[arg(long, env = "MCP_HUB_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Hub instance id used to scope registry queries
    #[arg(long, env = "MCP_HUB_PROXY_SERVER_ID")]
    proxy_server_id: Option<String>,

    /// Front end to serve callers on
    #[arg(long, value_enum)]
    transport: Option<FrontEnd>,

    /// Listen address for the HTTP front end
    #[arg(long)]
    listen: Option<String>,

    /// Log as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Report every backend's tools to the control plane and exit
    #[arg(long)]
    report_tools: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            api_key: self.api_key.clone(),
            api_base_url: self.api_base_url.clone(),
            proxy_server_id: self.proxy_server_id.clone(),
            transport: self.transport,
            listen: self.listen.clone(),
        }
    }
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// The assembled gateway plus the telemetry sink used by `--report-tools`
struct Hub {
    server: Arc<GatewayServer>,
    telemetry: Arc<dyn TelemetrySink>,
}

/// Static backends come from the config file when there is one, so a
/// forced registry refresh re-reads it
async fn static_registry(
    settings: &Settings,
    config_path: Option<&Path>,
) -> anyhow::Result<StaticRegistry> {
    let registry = match config_path {
        Some(path) => StaticRegistry::from_file(path).await,
        None => StaticRegistry::from_tables(settings.backends.clone(), &settings.features),
    };
    registry.context("Invalid backends in config")
}

async fn build_hub(settings: &Settings, config_path: Option<&Path>) -> anyhow::Result<Hub> {
    let (registry, collaborators): (Arc<dyn BackendRegistry>, Collaborators) =
        match &settings.control_plane {
            Some(plane) => {
                let mut config = ControlPlaneConfig::new(plane.base_url.clone());
                config.api_key = plane.api_key.clone();
                config.proxy_server_id = plane.proxy_server_id.clone();
                if let Some(ttl) = plane.cache_ttl {
                    config.cache_ttl = ttl;
                }
                let client = Arc::new(
                    ControlPlaneClient::new(config).context("Invalid control-plane settings")?,
                );
                tracing::info!(base_url = %client.base_url(), "Using control plane");
                let collaborators = Collaborators::default()
                    .with_features(client.clone())
                    .with_inactive_tools(client.clone())
                    .with_telemetry(client.clone())
                    .with_tool_logs(client.clone());
                (client as Arc<dyn BackendRegistry>, collaborators)
            }
            None => {
                let registry = Arc::new(static_registry(settings, config_path).await?);
                tracing::info!(
                    backends = registry.len(),
                    "No control plane configured, using static backends"
                );
                let collaborators = Collaborators::default()
                    .with_features(registry.clone())
                    .with_tool_logs(Arc::new(TracingToolLog::new()));
                (registry as Arc<dyn BackendRegistry>, collaborators)
            }
        };

    let telemetry = Arc::clone(&collaborators.telemetry);
    let connector = McpConnector::new(
        ConnectionFactory::new(settings.request_timeout),
        Establisher::new(RetryPolicy::new(settings.max_attempts, settings.retry_delay)),
    );
    let sessions = Arc::new(SessionCache::new(Arc::new(connector)));
    let router = Router::new(sessions, registry, collaborators);

    Ok(Hub {
        server: Arc::new(GatewayServer::new(Arc::new(router))),
        telemetry,
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config = match &cli.config {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            HubConfig::load(path)?
        }
        None => HubConfig::default(),
    };
    let settings = config.merge(cli.overrides())?;
    let hub = build_hub(&settings, cli.config.as_deref()).await?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        front_end = ?settings.front_end,
        "Starting hubd"
    );

    if cli.report_tools {
        let summary = report::report_all_tools(hub.server.router(), hub.telemetry.as_ref())
            .await
            .context("Could not report tools")?;
        println!(
            "Reported {} tools from {} of {} backends",
            summary.tools, summary.reported, summary.backends
        );
        hub.server.shutdown().await;
        return Ok(());
    }

    // Warm up sessions without delaying the first request
    let warm = Arc::clone(&hub.server);
    tokio::spawn(async move {
        warm.init_sessions().await;
    });

    let served = match settings.front_end {
        FrontEnd::Stdio => {
            tokio::select! {
                result = stdio::serve_stdio(Arc::clone(&hub.server)) => result,
                _ = shutdown_signal() => Ok(()),
            }
        }
        FrontEnd::Http => {
            http::serve(Arc::clone(&hub.server), settings.listen, shutdown_signal()).await
        }
    };

    hub.server.shutdown().await;
    served.context("Front end failed")?;
    Ok(())
}
