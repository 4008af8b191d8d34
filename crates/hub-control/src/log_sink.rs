//! Tool log sink that writes to the tracing log

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hub_core::{GatewayResult, ToolLogSink};
use serde_json::Value;
use tracing::{info, warn};

/// Logs every tool invocation under the `tool_log` target.
///
/// Used when tool logging is enabled without a control plane.
#[derive(Debug, Default)]
pub struct TracingToolLog {
    next_id: AtomicU64,
}

impl TracingToolLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ToolLogSink for TracingToolLog {
    async fn create_log(
        &self,
        tool_name: &str,
        backend_id: &str,
        arguments: &Value,
    ) -> GatewayResult<String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(target: "tool_log", log_id = id, tool = %tool_name, backend_id = %backend_id, arguments = %arguments, "Tool call started");
        Ok(id.to_string())
    }

    async fn complete_log(
        &self,
        log_id: &str,
        _result: &Value,
        elapsed: Duration,
    ) -> GatewayResult<()> {
        info!(target: "tool_log", log_id = %log_id, elapsed_ms = elapsed.as_millis() as u64, "Tool call completed");
        Ok(())
    }

    async fn fail_log(&self, log_id: &str, message: &str, elapsed: Duration) -> GatewayResult<()> {
        warn!(target: "tool_log", log_id = %log_id, elapsed_ms = elapsed.as_millis() as u64, error = %message, "Tool call failed");
        Ok(())
    }
}
