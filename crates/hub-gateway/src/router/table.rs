//! Routing table snapshot

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use hub_core::{BackendDescriptor, TargetKind};

use crate::session::Session;

/// Where a namespaced name or URI is served from
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub session: Arc<Session>,
    pub backend_id: String,
    /// Name (or URI) as the backend knows it
    pub original_name: String,
}

impl RouteEntry {
    pub fn new(session: &Arc<Session>, original_name: &str) -> Self {
        Self {
            session: Arc::clone(session),
            backend_id: session.backend_id().to_string(),
            original_name: original_name.to_string(),
        }
    }
}

/// Immutable routing snapshot.
///
/// The router never mutates a published table; every rebuild clones,
/// edits and swaps in a new `Arc`.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub tools: HashMap<String, RouteEntry>,
    pub prompts: HashMap<String, RouteEntry>,
    /// Keyed by original URI
    pub resources: HashMap<String, RouteEntry>,
    /// Namespaced names of tools marked inactive in the last tool listing
    pub inactive_tools: HashSet<String>,
}

impl RoutingTable {
    pub fn routes(&self, kind: TargetKind) -> &HashMap<String, RouteEntry> {
        match kind {
            TargetKind::Tool => &self.tools,
            TargetKind::Prompt => &self.prompts,
            TargetKind::Resource => &self.resources,
        }
    }

    fn routes_mut(&mut self, kind: TargetKind) -> &mut HashMap<String, RouteEntry> {
        match kind {
            TargetKind::Tool => &mut self.tools,
            TargetKind::Prompt => &mut self.prompts,
            TargetKind::Resource => &mut self.resources,
        }
    }

    pub fn lookup(&self, kind: TargetKind, name: &str) -> Option<&RouteEntry> {
        self.routes(kind).get(name)
    }

    pub fn is_inactive(&self, tool: &str) -> bool {
        self.inactive_tools.contains(tool)
    }

    /// Produce the next snapshot after one aggregation pass.
    ///
    /// Entries of backends no longer in `registry` are pruned. Entries of
    /// registered backends that contributed nothing this pass are kept, and
    /// fresh entries overwrite older ones.
    pub fn rebuilt(
        &self,
        kind: TargetKind,
        entries: Vec<(String, RouteEntry)>,
        registry: &BTreeMap<String, BackendDescriptor>,
        inactive: Option<HashSet<String>>,
    ) -> Self {
        let mut next = self.clone();
        let routes = next.routes_mut(kind);
        routes.retain(|_, entry| registry.contains_key(&entry.backend_id));
        routes.extend(entries);
        if let Some(inactive) = inactive {
            next.inactive_tools = inactive;
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hub_client::{McpClient, MockTransport};

    fn session(id: &str) -> Arc<Session> {
        let descriptor = BackendDescriptor::stdio(id, id, "unused");
        let client = McpClient::new(Arc::new(MockTransport::new(id)));
        Arc::new(Session::new(&descriptor, client))
    }

    fn registry(ids: &[&str]) -> BTreeMap<String, BackendDescriptor> {
        ids.iter()
            .map(|id| (id.to_string(), BackendDescriptor::stdio(*id, *id, "unused")))
            .collect()
    }

    #[test]
    fn rebuild_prunes_removed_backends() {
        let (a, b) = (session("a"), session("b"));
        let table = RoutingTable::default().rebuilt(
            TargetKind::Tool,
            vec![
                ("a__echo".into(), RouteEntry::new(&a, "echo")),
                ("b__echo".into(), RouteEntry::new(&b, "echo")),
            ],
            &registry(&["a", "b"]),
            None,
        );
        assert_eq!(table.tools.len(), 2);

        // b left the registry; a failed this pass and contributed nothing
        let next = table.rebuilt(TargetKind::Tool, Vec::new(), &registry(&["a"]), None);
        assert!(next.lookup(TargetKind::Tool, "a__echo").is_some());
        assert!(next.lookup(TargetKind::Tool, "b__echo").is_none());

        // the old snapshot is untouched
        assert_eq!(table.tools.len(), 2);
    }

    #[test]
    fn rebuild_only_touches_its_kind() {
        let a = session("a");
        let table = RoutingTable::default().rebuilt(
            TargetKind::Prompt,
            vec![("a__greet".into(), RouteEntry::new(&a, "greet"))],
            &registry(&["a"]),
            None,
        );
        let next = table.rebuilt(
            TargetKind::Tool,
            Vec::new(),
            &registry(&[]),
            Some(HashSet::from(["x__y".to_string()])),
        );
        assert!(next.lookup(TargetKind::Prompt, "a__greet").is_some());
        assert!(next.is_inactive("x__y"));
    }
}
