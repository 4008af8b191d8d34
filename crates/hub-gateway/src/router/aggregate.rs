//! Aggregate listing operations

use std::collections::HashSet;
use std::sync::Arc;

use hub_core::routing::{namespaced_name, prefixed_label};
use hub_core::{
    CapabilityKind, GatewayError, GatewayFeature, GatewayResult, InactiveFlagSet,
    ListPromptsResult, ListResourceTemplatesResult, ListResourcesResult, ListToolsResult,
    PaginatedParams, Prompt, Resource, ResourceTemplate, TargetKind, Tool, ToolReport,
};
use tracing::{debug, info, warn};

use super::{RouteEntry, Router};
use crate::session::Session;

/// Collects one pass's routes; the first name registered wins
struct PassRoutes {
    kind: TargetKind,
    seen: HashSet<String>,
    entries: Vec<(String, RouteEntry)>,
}

impl PassRoutes {
    fn new(kind: TargetKind) -> Self {
        Self {
            kind,
            seen: HashSet::new(),
            entries: Vec::new(),
        }
    }

    /// Register a route; returns false when the name was already taken
    fn claim(&mut self, name: &str, session: &Arc<Session>, original: &str) -> bool {
        if !self.seen.insert(name.to_string()) {
            warn!(
                kind = %self.kind,
                name = %name,
                backend_id = %session.backend_id(),
                "Duplicate name in aggregation pass, keeping the first backend"
            );
            return false;
        }
        self.entries
            .push((name.to_string(), RouteEntry::new(session, original)));
        true
    }
}

impl Router {
    /// `tools/list` across all backends.
    ///
    /// With tools management enabled, inactive tools stay routable but are
    /// hidden from the listing, and every backend's full list is reported to
    /// telemetry in the background.
    pub async fn list_tools(&self, params: &PaginatedParams) -> GatewayResult<ListToolsResult> {
        let features = self.collaborators.features.gateway_features(true).await;
        let backends = self.backends().await?;
        let managed = features.contains(&GatewayFeature::ToolsManagement);

        let inactive = if managed {
            self.collaborators
                .inactive_tools
                .inactive_tools(true)
                .await
                .unwrap_or_else(|e| {
                    warn!(error = %e, "Could not fetch inactive tools, treating all as active");
                    InactiveFlagSet::new()
                })
        } else {
            InactiveFlagSet::new()
        };

        let contributions = self
            .fan_out(&backends, CapabilityKind::Tools, |session| {
                let params = params.clone();
                async move {
                    session
                        .client()
                        .list_tools(&params)
                        .await
                        .map_err(GatewayError::from)
                }
            })
            .await;

        let mut routes = PassRoutes::new(TargetKind::Tool);
        let mut hidden = HashSet::new();
        let mut tools = Vec::new();

        for contribution in contributions {
            let namespace = contribution.namespace();
            let backend_id = contribution.descriptor.id.clone();

            if managed {
                self.report_tools(&backend_id, &contribution.result.tools);
            }

            for tool in contribution.result.tools {
                let name = namespaced_name(&namespace, &tool.name);
                if !routes.claim(&name, &contribution.session, &tool.name) {
                    continue;
                }
                if managed && inactive.contains(&backend_id, &tool.name) {
                    hidden.insert(name);
                    continue;
                }
                tools.push(Tool {
                    description: Some(prefixed_label(&namespace, tool.description.as_deref())),
                    name,
                    ..tool
                });
            }
        }

        debug!(count = tools.len(), hidden = hidden.len(), "Aggregated tools");
        self.commit(
            TargetKind::Tool,
            routes.entries,
            &backends,
            managed.then_some(hidden),
        );

        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    /// Fire-and-forget report of one backend's unfiltered tool list
    fn report_tools(&self, backend_id: &str, tools: &[Tool]) {
        if tools.is_empty() {
            return;
        }
        let reports: Vec<ToolReport> = tools
            .iter()
            .map(|tool| ToolReport {
                name: tool.name.clone(),
                description: tool.description.clone(),
                tool_schema: tool.input_schema.clone(),
                backend_id: backend_id.to_string(),
            })
            .collect();
        let telemetry = Arc::clone(&self.collaborators.telemetry);
        let counters = Arc::clone(&self.sink_counters);
        let backend_id = backend_id.to_string();
        tokio::spawn(async move {
            let count = reports.len();
            match telemetry.report_tools(reports).await {
                Ok(()) => debug!(backend_id = %backend_id, count, "Reported tools"),
                Err(e) => {
                    warn!(backend_id = %backend_id, error = %e, "Tool report failed");
                    counters.telemetry_failed();
                }
            }
        });
    }

    pub async fn list_prompts(&self, params: &PaginatedParams) -> GatewayResult<ListPromptsResult> {
        let backends = self.backends().await?;
        let contributions = self
            .fan_out(&backends, CapabilityKind::Prompts, |session| {
                let params = params.clone();
                async move {
                    session
                        .client()
                        .list_prompts(&params)
                        .await
                        .map_err(GatewayError::from)
                }
            })
            .await;

        let mut routes = PassRoutes::new(TargetKind::Prompt);
        let mut prompts = Vec::new();

        for contribution in contributions {
            let namespace = contribution.namespace();
            for prompt in contribution.result.prompts {
                let name = namespaced_name(&namespace, &prompt.name);
                if !routes.claim(&name, &contribution.session, &prompt.name) {
                    continue;
                }
                prompts.push(Prompt {
                    description: Some(prefixed_label(&namespace, prompt.description.as_deref())),
                    name,
                    ..prompt
                });
            }
        }

        self.commit(TargetKind::Prompt, routes.entries, &backends, None);
        Ok(ListPromptsResult {
            prompts,
            next_cursor: None,
        })
    }

    /// `resources/list`; URIs are routed as-is, display names get the
    /// backend prefix
    pub async fn list_resources(
        &self,
        params: &PaginatedParams,
    ) -> GatewayResult<ListResourcesResult> {
        let backends = self.backends().await?;
        let contributions = self
            .fan_out(&backends, CapabilityKind::Resources, |session| {
                let params = params.clone();
                async move {
                    session
                        .client()
                        .list_resources(&params)
                        .await
                        .map_err(GatewayError::from)
                }
            })
            .await;

        let mut routes = PassRoutes::new(TargetKind::Resource);
        let mut resources = Vec::new();

        for contribution in contributions {
            let namespace = contribution.namespace();
            for resource in contribution.result.resources {
                if !routes.claim(&resource.uri, &contribution.session, &resource.uri) {
                    continue;
                }
                resources.push(Resource {
                    name: prefixed_label(&namespace, Some(&resource.name)),
                    ..resource
                });
            }
        }

        self.commit(TargetKind::Resource, routes.entries, &backends, None);
        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    /// `resources/templates/list`; templates are listed, not routed
    pub async fn list_resource_templates(
        &self,
        params: &PaginatedParams,
    ) -> GatewayResult<ListResourceTemplatesResult> {
        let backends = self.backends().await?;
        let contributions = self
            .fan_out(&backends, CapabilityKind::Resources, |session| {
                let params = params.clone();
                async move {
                    session
                        .client()
                        .list_resource_templates(&params)
                        .await
                        .map_err(GatewayError::from)
                }
            })
            .await;

        let resource_templates: Vec<ResourceTemplate> = contributions
            .into_iter()
            .flat_map(|contribution| {
                let namespace = contribution.namespace();
                contribution
                    .result
                    .resource_templates
                    .into_iter()
                    .map(move |template| ResourceTemplate {
                        name: prefixed_label(&namespace, Some(&template.name)),
                        ..template
                    })
            })
            .collect();

        info!(count = resource_templates.len(), "Aggregated resource templates");
        Ok(ListResourceTemplatesResult {
            resource_templates,
            next_cursor: None,
        })
    }
}
