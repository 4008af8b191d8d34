//! echo-backend - stdio MCP server used by the integration tests
//!
//! Usage:
//!   echo-backend --name A [--fail-tools-list]

use clap::Parser;
use hub_core::JsonRpcRequest;
use hub_tests::EchoBackend;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "echo-backend")]
#[command(about = "Minimal MCP server over stdio")]
struct Args {
    /// Server name; also the URI scheme of its resources (lowercased)
    #[arg(long, default_value = "Echo")]
    name: String,

    /// Fail every tools/list request
    #[arg(long)]
    fail_tools_list: bool,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut backend = EchoBackend::new(&args.name);
    if args.fail_tools_list {
        backend = backend.failing_tools_list();
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        let request = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring malformed line");
                continue;
            }
        };
        let Some(reply) = backend.handle(request) else {
            continue;
        };
        let encoded = serde_json::to_string(&reply)?;
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
    }

    tracing::debug!(name = %args.name, "stdin closed");
    Ok(())
}
