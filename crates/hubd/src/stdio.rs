//! Stdio front end
//!
//! Reads newline-delimited JSON-RPC from stdin and writes replies to
//! stdout. Requests are handled concurrently, so a slow tool call does not
//! hold up a `ping`; replies are written whole, one per line.

use std::sync::Arc;

use hub_gateway::GatewayServer;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Serve until the reader reaches EOF and every in-flight request has been
/// answered
pub async fn serve<R, W>(server: Arc<GatewayServer>, reader: R, mut writer: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer_task = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            writer.write_all(line.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok::<_, std::io::Error>(())
    });

    let mut lines = BufReader::new(reader).lines();
    let mut in_flight = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let server = Arc::clone(&server);
        let tx = tx.clone();
        in_flight.spawn(async move {
            if let Some(reply) = server.handle_line(&line).await {
                if tx.send(reply).is_err() {
                    debug!("Output closed, dropping reply");
                }
            }
        });
        // reap finished handlers so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}
    }

    info!("Input closed, finishing in-flight requests");
    while in_flight.join_next().await.is_some() {}
    drop(tx);

    match writer_task.await {
        Ok(result) => result,
        Err(e) => {
            warn!(error = %e, "Writer task failed");
            Ok(())
        }
    }
}

/// Serve on the process's own stdin and stdout
pub async fn serve_stdio(server: Arc<GatewayServer>) -> std::io::Result<()> {
    info!("Serving MCP over stdio");
    serve(server, tokio::io::stdin(), tokio::io::stdout()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_client::MockTransport;
    use hub_core::testing::MemoryRegistry;
    use hub_core::BackendDescriptor;
    use hub_gateway::testing::{mock_backend, router_with, ScriptedConnector};
    use hub_gateway::Collaborators;
    use serde_json::Value;

    fn server(backend: MockTransport) -> Arc<GatewayServer> {
        let connector = Arc::new(ScriptedConnector::new().with_backend("a", backend));
        let registry = Arc::new(MemoryRegistry::new([BackendDescriptor::stdio("a", "A", "unused")]));
        Arc::new(GatewayServer::new(Arc::new(router_with(
            connector,
            registry,
            Collaborators::default(),
        ))))
    }

    #[tokio::test]
    async fn answers_each_request_on_its_own_line() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
            "garbage\n",
        );
        let (out_writer, out_reader) = tokio::io::duplex(64 * 1024);

        serve(server(mock_backend("A")), input.as_bytes(), out_writer)
            .await
            .unwrap();

        let mut replies = Vec::new();
        let mut lines = BufReader::new(out_reader).lines();
        while let Some(line) = lines.next_line().await.unwrap() {
            replies.push(serde_json::from_str::<Value>(&line).unwrap());
        }
        assert_eq!(replies.len(), 3);

        let by_id = |id: Value| replies.iter().find(|r| r["id"] == id).cloned().unwrap();
        assert_eq!(by_id(Value::from(1))["result"], serde_json::json!({}));
        assert_eq!(by_id(Value::from(2))["result"]["tools"][0]["name"], "A__echo");
        assert_eq!(by_id(Value::Null)["error"]["code"], -32700);
    }
}
