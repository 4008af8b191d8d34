//! One-shot tool report
//!
//! Connects to every active backend, lists its tools and sends them to
//! the telemetry sink, independent of the tools-management flag.

use futures::future::join_all;
use hub_core::{CapabilityKind, PaginatedParams, TelemetrySink, ToolReport};
use hub_gateway::{GatewayResult, Router};
use tracing::{info, warn};

/// Per-run totals
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReportSummary {
    pub backends: usize,
    pub reported: usize,
    pub tools: usize,
}

pub async fn report_all_tools(
    router: &Router,
    telemetry: &dyn TelemetrySink,
) -> GatewayResult<ReportSummary> {
    let backends = router.registry().list_backends(true).await?;
    router.sessions().init_all(router.registry().as_ref()).await;

    let active = backends.values().filter(|descriptor| descriptor.is_active());
    let outcomes = join_all(active.map(|descriptor| async move {
        let Some(session) = router.sessions().session_for(descriptor).await else {
            warn!(backend_id = %descriptor.id, name = %descriptor.name, "Could not establish session");
            return None;
        };
        if !session.supports(CapabilityKind::Tools) {
            info!(backend_id = %descriptor.id, "Backend does not support tools");
            return None;
        }

        let listed = match session.client().list_tools(&PaginatedParams::default()).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!(backend_id = %descriptor.id, error = %e, "Listing tools failed");
                return None;
            }
        };
        if listed.tools.is_empty() {
            info!(backend_id = %descriptor.id, "No tools to report");
            return None;
        }

        let reports: Vec<ToolReport> = listed
            .tools
            .into_iter()
            .map(|tool| ToolReport {
                name: tool.name,
                description: tool.description,
                tool_schema: tool.input_schema,
                backend_id: descriptor.id.clone(),
            })
            .collect();
        let count = reports.len();
        match telemetry.report_tools(reports).await {
            Ok(()) => {
                info!(backend_id = %descriptor.id, count, "Reported tools");
                Some(count)
            }
            Err(e) => {
                warn!(backend_id = %descriptor.id, error = %e, "Tool report failed");
                None
            }
        }
    }))
    .await;

    let summary = ReportSummary {
        backends: backends.len(),
        reported: outcomes.iter().flatten().count(),
        tools: outcomes.iter().flatten().sum(),
    };
    info!(?summary, "Finished reporting tools");
    Ok(summary)
}
