//! Dispatch operations

use std::sync::Arc;
use std::time::{Duration, Instant};

use hub_core::{
    CallToolParams, GatewayError, GatewayFeature, GatewayResult, GetPromptParams,
    ReadResourceParams, TargetKind, ToolLogSink,
};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{RouteEntry, Router};

impl Router {
    fn route(&self, kind: TargetKind, name: &str) -> GatewayResult<RouteEntry> {
        self.snapshot()
            .lookup(kind, name)
            .cloned()
            .ok_or_else(|| GatewayError::unknown(kind, name))
    }

    /// `tools/call` routed to the owning backend.
    ///
    /// Unknown and disabled tools fail before any backend I/O. The backend
    /// sees its own tool name, the caller's arguments and `_meta`; its
    /// result or error comes back unchanged.
    pub async fn call_tool(&self, params: CallToolParams) -> GatewayResult<Value> {
        let table = self.snapshot();
        let entry = table
            .lookup(TargetKind::Tool, &params.name)
            .cloned()
            .ok_or_else(|| GatewayError::unknown(TargetKind::Tool, &params.name))?;

        let features = self.collaborators.features.gateway_features(false).await;
        if features.contains(&GatewayFeature::ToolsManagement) && table.is_inactive(&params.name) {
            debug!(tool = %params.name, "Refusing call to inactive tool");
            return Err(GatewayError::ToolDisabled(params.name));
        }

        let arguments = params.arguments.unwrap_or_else(|| json!({}));
        let log_id = if features.contains(&GatewayFeature::ToolLogs) {
            self.create_log(&entry, &arguments).await
        } else {
            None
        };

        let forwarded = CallToolParams {
            name: entry.original_name.clone(),
            arguments: Some(arguments),
            meta: params.meta,
        };

        let started = Instant::now();
        let result = entry
            .session
            .client()
            .call_tool(&forwarded)
            .await
            .map_err(GatewayError::from);
        let elapsed = started.elapsed();

        if let Err(e) = &result {
            warn!(tool = %params.name, backend_id = %entry.backend_id, error = %e, "Tool call failed");
        }
        if let Some(log_id) = log_id {
            self.finish_log(log_id, &result, elapsed);
        }

        result
    }

    async fn create_log(&self, entry: &RouteEntry, arguments: &Value) -> Option<String> {
        match self
            .collaborators
            .tool_logs
            .create_log(&entry.original_name, &entry.backend_id, arguments)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(tool = %entry.original_name, error = %e, "Could not create tool log");
                self.sink_counters.tool_log_failed();
                None
            }
        }
    }

    /// Complete or fail the log in the background; errors are dropped
    fn finish_log(&self, log_id: String, result: &GatewayResult<Value>, elapsed: Duration) {
        let sink: Arc<dyn ToolLogSink> = Arc::clone(&self.collaborators.tool_logs);
        let counters = Arc::clone(&self.sink_counters);
        let outcome = match result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(e.to_string()),
        };
        tokio::spawn(async move {
            let finished = match outcome {
                Ok(value) => sink.complete_log(&log_id, &value, elapsed).await,
                Err(message) => sink.fail_log(&log_id, &message, elapsed).await,
            };
            if let Err(e) = finished {
                warn!(log_id = %log_id, error = %e, "Could not finalize tool log");
                counters.tool_log_failed();
            }
        });
    }

    /// `prompts/get` routed to the owning backend
    pub async fn get_prompt(&self, params: GetPromptParams) -> GatewayResult<Value> {
        let entry = self.route(TargetKind::Prompt, &params.name)?;
        let forwarded = GetPromptParams {
            name: entry.original_name.clone(),
            ..params
        };
        entry
            .session
            .client()
            .get_prompt(&forwarded)
            .await
            .map_err(GatewayError::from)
    }

    /// `resources/read` routed by URI
    pub async fn read_resource(&self, params: ReadResourceParams) -> GatewayResult<Value> {
        let entry = self.route(TargetKind::Resource, &params.uri)?;
        entry
            .session
            .client()
            .read_resource(&params)
            .await
            .map_err(GatewayError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Collaborators;
    use crate::testing::{mock_backend, router_with, ScriptedConnector};
    use hub_client::transport::mock::MockReply;
    use hub_client::MockTransport;
    use hub_core::testing::{wait_for, LogOutcome, MemoryFlags, MemoryRegistry, MemoryToolLog};
    use hub_core::{error_codes, methods, BackendDescriptor, PaginatedParams, RpcError};
    use pretty_assertions::assert_eq;

    struct Fixture {
        router: Router,
        a: MockTransport,
        b: MockTransport,
    }

    async fn fixture(collaborators: Collaborators) -> Fixture {
        let (a, b) = (mock_backend("A"), mock_backend("B"));
        let connector = ScriptedConnector::new()
            .with_backend("a", a.clone())
            .with_backend("b", b.clone());
        let registry = MemoryRegistry::new([
            BackendDescriptor::stdio("a", "A", "unused"),
            BackendDescriptor::stdio("b", "B", "unused"),
        ]);
        let router = router_with(Arc::new(connector), Arc::new(registry), collaborators);
        let all = PaginatedParams::default();
        router.list_tools(&all).await.unwrap();
        router.list_prompts(&all).await.unwrap();
        router.list_resources(&all).await.unwrap();
        Fixture { router, a, b }
    }

    fn call(name: &str, arguments: Option<Value>) -> CallToolParams {
        CallToolParams {
            name: name.into(),
            arguments,
            meta: None,
        }
    }

    #[tokio::test]
    async fn call_reaches_only_the_owning_backend() {
        let f = fixture(Collaborators::default()).await;
        let params = CallToolParams {
            name: "B__echo".into(),
            arguments: Some(json!({"text": "hi"})),
            meta: Some(json!({"progressToken": 42})),
        };

        let result = f.router.call_tool(params).await.unwrap();
        assert_eq!(result["content"][0]["text"], "from B");

        let calls = f.b.calls_to(methods::TOOLS_CALL);
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].params,
            Some(json!({"name": "echo", "arguments": {"text": "hi"}, "_meta": {"progressToken": 42}}))
        );
        assert!(f.a.calls_to(methods::TOOLS_CALL).is_empty());
    }

    #[tokio::test]
    async fn missing_arguments_are_sent_as_empty_object() {
        let f = fixture(Collaborators::default()).await;
        f.router.call_tool(call("A__echo", None)).await.unwrap();
        let calls = f.a.calls_to(methods::TOOLS_CALL);
        assert_eq!(calls[0].params, Some(json!({"name": "echo", "arguments": {}})));
    }

    #[tokio::test]
    async fn unknown_names_fail_without_backend_io() {
        let f = fixture(Collaborators::default()).await;
        let before = f.a.recorded().len() + f.b.recorded().len();

        let err = f.router.call_tool(call("C__echo", None)).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTarget { kind: TargetKind::Tool, .. }));
        assert_eq!(err.to_string(), "Unknown tool: C__echo");

        let err = f
            .router
            .get_prompt(GetPromptParams {
                name: "A__missing".into(),
                arguments: None,
                meta: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTarget { kind: TargetKind::Prompt, .. }));

        let err = f
            .router
            .read_resource(ReadResourceParams {
                uri: "c://readme".into(),
                meta: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::UnknownTarget { kind: TargetKind::Resource, .. }));

        assert_eq!(f.a.recorded().len() + f.b.recorded().len(), before);
    }

    #[tokio::test]
    async fn backend_errors_pass_through_unchanged() {
        let f = fixture(Collaborators::default()).await;
        let mut refused = RpcError::new(-32001, "quota exceeded");
        refused.data = Some(json!({"retryAfter": 30}));
        f.a.set_reply(
            methods::TOOLS_CALL,
            MockReply::Error(refused.clone()),
        );

        let err = f.router.call_tool(call("A__echo", None)).await.unwrap_err();
        assert_eq!(err.into_rpc_error(), refused);
    }

    #[tokio::test]
    async fn transport_failures_surface_as_internal_errors() {
        let f = fixture(Collaborators::default()).await;
        f.a.set_reply(
            methods::TOOLS_CALL,
            MockReply::Fail("broken pipe".into()),
        );
        let err = f.router.call_tool(call("A__echo", None)).await.unwrap_err();
        assert_eq!(err.rpc_code(), error_codes::INTERNAL_ERROR);
    }

    #[tokio::test]
    async fn inactive_tools_are_refused_while_management_is_on() {
        let flags = Arc::new(MemoryFlags::new());
        flags.enable(GatewayFeature::ToolsManagement);
        flags.deactivate("a", "echo");
        let collaborators = Collaborators::default()
            .with_features(flags.clone())
            .with_inactive_tools(flags.clone());
        let f = fixture(collaborators).await;

        let err = f.router.call_tool(call("A__echo", None)).await.unwrap_err();
        assert!(matches!(err, GatewayError::ToolDisabled(ref name) if name == "A__echo"));
        assert!(f.a.calls_to(methods::TOOLS_CALL).is_empty());

        // turning management off lets the call through on the same snapshot
        flags.disable(GatewayFeature::ToolsManagement);
        f.router.call_tool(call("A__echo", None)).await.unwrap();
        assert_eq!(f.a.calls_to(methods::TOOLS_CALL).len(), 1);
    }

    #[tokio::test]
    async fn reactivated_tools_become_callable_after_relisting() {
        let flags = Arc::new(MemoryFlags::new());
        flags.enable(GatewayFeature::ToolsManagement);
        flags.deactivate("b", "echo");
        let collaborators = Collaborators::default()
            .with_features(flags.clone())
            .with_inactive_tools(flags.clone());
        let f = fixture(collaborators).await;
        assert!(f.router.call_tool(call("B__echo", None)).await.is_err());

        flags.reactivate_all();
        let listed = f.router.list_tools(&PaginatedParams::default()).await.unwrap();
        assert_eq!(listed.tools.len(), 2);
        f.router.call_tool(call("B__echo", None)).await.unwrap();
    }

    #[tokio::test]
    async fn tool_logs_record_success_and_failure() {
        let flags = Arc::new(MemoryFlags::new());
        flags.enable(GatewayFeature::ToolLogs);
        let logs = Arc::new(MemoryToolLog::new());
        let collaborators = Collaborators::default()
            .with_features(flags)
            .with_tool_logs(logs.clone());
        let f = fixture(collaborators).await;

        f.router
            .call_tool(call("A__echo", Some(json!({"text": "hi"}))))
            .await
            .unwrap();
        f.b.set_reply(
            methods::TOOLS_CALL,
            MockReply::Error(RpcError::new(-32000, "boom")),
        );
        f.router.call_tool(call("B__echo", None)).await.unwrap_err();

        let settled = wait_for(
            || {
                let logs = logs.clone();
                async move {
                    logs.records()
                        .iter()
                        .all(|r| r.outcome != LogOutcome::Pending)
                }
            },
            Duration::from_secs(2),
        )
        .await;
        assert!(settled);

        let records = logs.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].tool_name, "echo");
        assert_eq!(records[0].backend_id, "a");
        assert_eq!(records[0].arguments, json!({"text": "hi"}));
        assert!(matches!(
            &records[0].outcome,
            LogOutcome::Completed { result, .. } if result["content"][0]["text"] == "from A"
        ));
        assert!(matches!(
            &records[1].outcome,
            LogOutcome::Failed { message, .. } if message.contains("boom")
        ));
    }

    #[tokio::test]
    async fn failing_log_sink_does_not_affect_the_call() {
        let flags = Arc::new(MemoryFlags::new());
        flags.enable(GatewayFeature::ToolLogs);
        let collaborators = Collaborators::default()
            .with_features(flags)
            .with_tool_logs(Arc::new(MemoryToolLog::failing()));
        let f = fixture(collaborators).await;

        let result = f.router.call_tool(call("A__echo", None)).await.unwrap();
        assert_eq!(result["content"][0]["text"], "from A");
        assert_eq!(f.router.sink_failures().tool_logs, 1);
    }

    #[tokio::test]
    async fn prompts_and_resources_are_forwarded() {
        let f = fixture(Collaborators::default()).await;

        let prompt = f
            .router
            .get_prompt(GetPromptParams {
                name: "B__greet".into(),
                arguments: Some(json!({"who": "world"})),
                meta: None,
            })
            .await
            .unwrap();
        assert_eq!(prompt["messages"][0]["role"], "user");
        let calls = f.b.calls_to(methods::PROMPTS_GET);
        assert_eq!(
            calls[0].params,
            Some(json!({"name": "greet", "arguments": {"who": "world"}}))
        );

        let read = f
            .router
            .read_resource(ReadResourceParams {
                uri: "a://readme".into(),
                meta: None,
            })
            .await
            .unwrap();
        assert_eq!(read["contents"][0]["text"], "docs");
        let calls = f.a.calls_to(methods::RESOURCES_READ);
        assert_eq!(calls[0].params, Some(json!({"uri": "a://readme"})));
        assert!(f.b.calls_to(methods::RESOURCES_READ).is_empty());
    }
}
