//! HTTP front end
//!
//! `POST /mcp` takes one JSON-RPC message or a batch and answers with JSON.
//! Notifications get `202 Accepted` with no body. `GET /health` reports
//! liveness, the number of open backend sessions and sink failure counts.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::future::join_all;
use hub_gateway::GatewayServer;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::info;

pub fn create_router(server: Arc<GatewayServer>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/mcp", post(handle_mcp))
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn health(State(server): State<Arc<GatewayServer>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "sessions": server.router().sessions().len().await,
        "sink_failures": server.router().sink_failures(),
    }))
}

async fn handle_mcp(State(server): State<Arc<GatewayServer>>, Json(body): Json<Value>) -> Response {
    match body {
        Value::Array(batch) => {
            let replies: Vec<Value> = join_all(batch.into_iter().map(|m| server.handle_value(m)))
                .await
                .into_iter()
                .flatten()
                .filter_map(|r| serde_json::to_value(r).ok())
                .collect();
            if replies.is_empty() {
                StatusCode::ACCEPTED.into_response()
            } else {
                Json(Value::Array(replies)).into_response()
            }
        }
        message => match server.handle_value(message).await {
            Some(reply) => Json(reply).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        },
    }
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(server: Arc<GatewayServer>, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Serving MCP on http://{}/mcp", listener.local_addr()?);
    axum::serve(listener, create_router(server))
        .with_graceful_shutdown(shutdown)
        .await
}
