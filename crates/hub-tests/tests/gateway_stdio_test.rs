//! End-to-end tests for the gateway over real stdio backends
//!
//! Every backend is an `echo-backend` child process, spawned by the
//! gateway's own connection factory.
//!
//! Run with: cargo test -p hub-tests --test gateway_stdio_test

use std::sync::Arc;
use std::time::Duration;

use hub_core::testing::{wait_for, LogOutcome, MemoryToolLog};
use hub_core::{error_codes, BackendDescriptor, GatewayFeature};
use hub_gateway::{Collaborators, ConnectionFactory, Establisher, RetryPolicy};
use hub_tests::{gateway, gateway_with, request, sorted_names};
use pretty_assertions::assert_eq;
use serde_json::json;

const ECHO_BACKEND: &str = env!("CARGO_BIN_EXE_echo-backend");

fn echo(id: &str, name: &str) -> BackendDescriptor {
    BackendDescriptor::stdio(id, name, ECHO_BACKEND).with_args(["--name", name])
}

#[tokio::test]
async fn tools_from_two_processes_are_namespaced() {
    let (server, _) = gateway(vec![echo("a", "A"), echo("b", "B")]);

    let listed = request(&server, "tools/list", json!({})).await;
    assert_eq!(
        sorted_names(&listed, "tools", "name"),
        vec!["A__echo".to_string(), "B__echo".to_string()]
    );
    assert_eq!(server.router().sessions().len().await, 2);

    let called = request(
        &server,
        "tools/call",
        json!({"name": "B__echo", "arguments": {"message": "hi"}}),
    )
    .await;
    assert_eq!(called["result"]["content"][0]["text"], "B: hi");

    server.shutdown().await;
    assert!(server.router().sessions().is_empty().await);
}

#[tokio::test]
async fn prompts_and_resources_reach_their_owner() {
    let (server, _) = gateway(vec![echo("a", "A"), echo("b", "B")]);

    let prompts = request(&server, "prompts/list", json!({})).await;
    assert_eq!(
        sorted_names(&prompts, "prompts", "name"),
        vec!["A__greet".to_string(), "B__greet".to_string()]
    );
    let greeting = request(
        &server,
        "prompts/get",
        json!({"name": "A__greet", "arguments": {"who": "Ada"}}),
    )
    .await;
    assert_eq!(
        greeting["result"]["messages"][0]["content"]["text"],
        "Hello, Ada from A"
    );

    let resources = request(&server, "resources/list", json!({})).await;
    assert_eq!(
        sorted_names(&resources, "resources", "uri"),
        vec!["a://readme".to_string(), "b://readme".to_string()]
    );
    let read = request(&server, "resources/read", json!({"uri": "b://readme"})).await;
    assert_eq!(read["result"]["contents"][0]["text"], "readme of B");

    let templates = request(&server, "resources/templates/list", json!({})).await;
    assert_eq!(
        sorted_names(&templates, "resourceTemplates", "uriTemplate"),
        vec!["a://files/{path}".to_string(), "b://files/{path}".to_string()]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn unknown_names_are_rejected() {
    let (server, _) = gateway(vec![echo("a", "A")]);
    request(&server, "tools/list", json!({})).await;

    let missing = request(&server, "tools/call", json!({"name": "A__missing"})).await;
    assert_eq!(missing["error"]["code"], error_codes::INVALID_PARAMS);

    let unread = request(&server, "resources/read", json!({"uri": "z://nowhere"})).await;
    assert_eq!(unread["error"]["code"], error_codes::INVALID_PARAMS);

    server.shutdown().await;
}

#[tokio::test]
async fn broken_backends_do_not_hide_healthy_ones() {
    let (server, _) = gateway(vec![
        echo("a", "A"),
        echo("b", "B").with_args(["--name", "B", "--fail-tools-list"]),
        BackendDescriptor::stdio("c", "C", "/nonexistent/echo-backend"),
    ]);

    let listed = request(&server, "tools/list", json!({})).await;
    assert_eq!(
        sorted_names(&listed, "tools", "name"),
        vec!["A__echo".to_string()]
    );

    // B still serves prompts even though its tool listing fails
    let prompts = request(&server, "prompts/list", json!({})).await;
    assert_eq!(
        sorted_names(&prompts, "prompts", "name"),
        vec!["A__greet".to_string(), "B__greet".to_string()]
    );

    server.shutdown().await;
}

#[tokio::test]
async fn removed_backends_lose_their_routes() {
    let (server, registry) = gateway(vec![echo("a", "A"), echo("b", "B")]);
    request(&server, "tools/list", json!({})).await;

    registry.remove("b");
    let listed = request(&server, "tools/list", json!({})).await;
    assert_eq!(
        sorted_names(&listed, "tools", "name"),
        vec!["A__echo".to_string()]
    );

    let stale = request(&server, "tools/call", json!({"name": "B__echo"})).await;
    assert_eq!(stale["error"]["code"], error_codes::INVALID_PARAMS);

    server.shutdown().await;
}

#[tokio::test]
async fn tool_calls_are_logged_when_enabled() {
    let flags = Arc::new(hub_core::testing::MemoryFlags::new());
    flags.enable(GatewayFeature::ToolLogs);
    let log = Arc::new(MemoryToolLog::new());
    let (server, _) = gateway_with(
        vec![echo("a", "A")],
        Collaborators::default()
            .with_features(flags)
            .with_tool_logs(log.clone()),
    );
    request(&server, "tools/list", json!({})).await;

    let called = request(
        &server,
        "tools/call",
        json!({"name": "A__echo", "arguments": {"message": "logged"}}),
    )
    .await;
    assert_eq!(called["result"]["content"][0]["text"], "A: logged");

    let finished = wait_for(
        || async {
            log.records()
                .iter()
                .any(|r| matches!(r.outcome, LogOutcome::Completed { .. }))
        },
        Duration::from_secs(2),
    )
    .await;
    assert!(finished);

    let records = log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tool_name, "echo");
    assert_eq!(records[0].backend_id, "a");
    assert_eq!(records[0].arguments, json!({"message": "logged"}));

    server.shutdown().await;
}

/// A backend whose first two spawns exit at once; the third one serves
#[tokio::test]
async fn retries_respawn_a_crashing_backend() {
    let dir = tempfile::tempdir().unwrap();
    let counter = dir.path().join("spawns");
    let script = r#"n=$(cat "$SPAWN_COUNTER" 2>/dev/null || echo 0)
n=$((n + 1))
echo "$n" > "$SPAWN_COUNTER"
[ "$n" -lt 3 ] && exit 1
exec "$ECHO_BACKEND" --name A"#;
    let descriptor = BackendDescriptor::stdio("a", "A", "sh")
        .with_args(["-c", script])
        .with_env("SPAWN_COUNTER", counter.display().to_string())
        .with_env("ECHO_BACKEND", ECHO_BACKEND);

    let client = ConnectionFactory::default().build(&descriptor).unwrap();
    let session = Establisher::new(RetryPolicy::new(3, Duration::from_millis(50)))
        .establish(&descriptor, client)
        .await
        .unwrap();

    assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
    assert_eq!(session.server_info().unwrap().name, "A");
    session.close().await;
}
