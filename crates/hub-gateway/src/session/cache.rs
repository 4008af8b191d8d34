//! Session cache keyed by backend id plus configuration fingerprint

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use hub_core::{BackendDescriptor, BackendRegistry, SessionKey};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{Connector, Session};

/// Owns every live backend session.
///
/// Sessions are created on first use, reused while the descriptor's
/// fingerprint is unchanged, and closed only on invalidation or shutdown.
/// Establishment is serialized per backend id, so concurrent misses for
/// the same backend share one connection.
pub struct SessionCache {
    connector: Arc<dyn Connector>,
    sessions: Mutex<HashMap<SessionKey, Arc<Session>>>,
    establishing: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionCache {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            sessions: Mutex::new(HashMap::new()),
            establishing: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn establish_lock(&self, backend_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.establishing
                .lock()
                .entry(backend_id.to_string())
                .or_default(),
        )
    }

    async fn cached(&self, key: &SessionKey) -> Option<Arc<Session>> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Return the session for `key`, creating it if needed.
    ///
    /// A hit is returned without re-checking the descriptor. On a miss,
    /// sessions for the same backend under an older configuration are torn
    /// down first. Connection failures are logged and yield `None`; the
    /// cache keeps no entry for `key` in that case.
    pub async fn get(
        &self,
        key: &SessionKey,
        descriptor: &BackendDescriptor,
    ) -> Option<Arc<Session>> {
        if let Some(session) = self.cached(key).await {
            return Some(session);
        }

        let lock = self.establish_lock(&descriptor.id);
        let _guard = lock.lock().await;

        // Another caller may have finished while we waited
        if let Some(session) = self.cached(key).await {
            return Some(session);
        }

        let stale = self.evict(&descriptor.id).await;
        if !stale.is_empty() {
            info!(backend_id = %descriptor.id, count = stale.len(), "Configuration changed, closing stale sessions");
            join_all(stale.iter().map(|s| s.close())).await;
        }

        debug!(backend_id = %descriptor.id, key = %key, "No cached session, connecting");
        match self.connector.connect(descriptor).await {
            Ok(session) => {
                self.sessions
                    .lock()
                    .await
                    .insert(key.clone(), Arc::clone(&session));
                Some(session)
            }
            Err(e) => {
                warn!(backend_id = %descriptor.id, error = %e, "Failed to create session");
                None
            }
        }
    }

    /// Convenience wrapper deriving the key from the descriptor
    pub async fn session_for(&self, descriptor: &BackendDescriptor) -> Option<Arc<Session>> {
        self.get(&descriptor.session_key(), descriptor).await
    }

    async fn evict(&self, backend_id: &str) -> Vec<Arc<Session>> {
        let mut sessions = self.sessions.lock().await;
        let keys: Vec<SessionKey> = sessions
            .keys()
            .filter(|k| k.is_for(backend_id))
            .cloned()
            .collect();
        keys.iter().filter_map(|k| sessions.remove(k)).collect()
    }

    /// Close every session belonging to one backend
    pub async fn invalidate(&self, backend_id: &str) -> usize {
        let stale = self.evict(backend_id).await;
        join_all(stale.iter().map(|s| s.close())).await;
        stale.len()
    }

    /// Eagerly connect every active backend.
    ///
    /// Individual failures are logged; returns how many sessions exist
    /// afterwards.
    pub async fn init_all(&self, registry: &dyn BackendRegistry) -> usize {
        let backends = match registry.list_backends(true).await {
            Ok(backends) => backends,
            Err(e) => {
                warn!(error = %e, "Could not fetch backend registry for session warm-up");
                return 0;
            }
        };

        let results = join_all(
            backends
                .values()
                .filter(|d| d.is_active())
                .map(|d| self.session_for(d)),
        )
        .await;
        let connected = results.iter().filter(|s| s.is_some()).count();
        info!(connected, total = backends.len(), "Backend sessions initialised");
        connected
    }

    /// Close every session and empty the cache
    pub async fn cleanup_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.sessions.lock().await;
            map.drain().map(|(_, s)| s).collect()
        };
        if sessions.is_empty() {
            return;
        }
        info!(count = sessions.len(), "Closing all backend sessions");
        join_all(sessions.iter().map(|s| s.close())).await;
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }

    pub async fn contains(&self, key: &SessionKey) -> bool {
        self.sessions.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnector;
    use hub_client::MockTransport;
    use hub_core::testing::MemoryRegistry;
    use hub_core::BackendStatus;

    fn backend(id: &str, token: &str) -> BackendDescriptor {
        BackendDescriptor::stdio(id, id.to_uppercase(), "server").with_env("TOKEN", token)
    }

    #[tokio::test]
    async fn same_key_reuses_session() {
        let connector = Arc::new(ScriptedConnector::new().with_backend("a", MockTransport::new("A")));
        let cache = SessionCache::new(connector.clone());
        let d = backend("a", "1");

        let first = cache.session_for(&d).await.unwrap();
        let second = cache.session_for(&d).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.connects("a"), 1);
    }

    #[tokio::test]
    async fn changed_fingerprint_replaces_session() {
        let connector = Arc::new(ScriptedConnector::new().with_backend("a", MockTransport::new("A")));
        let cache = SessionCache::new(connector.clone());

        let old = cache.session_for(&backend("a", "1")).await.unwrap();
        let new = cache.session_for(&backend("a", "2")).await.unwrap();

        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert_eq!(cache.len().await, 1);
        assert!(cache.contains(&backend("a", "2").session_key()).await);
        assert_eq!(connector.connects("a"), 2);
        // The stale session was torn down before the replacement connected
        assert_eq!(connector.open_at_connect("a"), vec![0, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_leaves_no_entry() {
        let connector = Arc::new(
            ScriptedConnector::new().with_backend("a", MockTransport::new("A").fail_starts(99)),
        );
        let cache = SessionCache::new(connector);

        assert!(cache.session_for(&backend("a", "1")).await.is_none());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_connection() {
        let connector = Arc::new(ScriptedConnector::new().with_backend(
            "a",
            MockTransport::new("A").with_delay(std::time::Duration::from_millis(20)),
        ));
        let cache = SessionCache::new(connector.clone());
        let d = backend("a", "1");

        let (x, y) = tokio::join!(cache.session_for(&d), cache.session_for(&d));
        assert!(Arc::ptr_eq(&x.unwrap(), &y.unwrap()));
        assert_eq!(connector.connects("a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn init_all_tolerates_failures_and_skips_inactive() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_backend("a", MockTransport::new("A"))
                .with_backend("b", MockTransport::new("B").fail_starts(99))
                .with_backend("c", MockTransport::new("C")),
        );
        let registry = MemoryRegistry::new([
            backend("a", "1"),
            backend("b", "1"),
            backend("c", "1").with_status(BackendStatus::Inactive),
        ]);
        let cache = SessionCache::new(connector.clone());

        assert_eq!(cache.init_all(&registry).await, 1);
        assert_eq!(connector.connects("c"), 0);
    }

    #[tokio::test]
    async fn cleanup_closes_everything() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_backend("a", MockTransport::new("A"))
                .with_backend("b", MockTransport::new("B")),
        );
        let cache = SessionCache::new(connector);
        let a = cache.session_for(&backend("a", "1")).await.unwrap();
        let b = cache.session_for(&backend("b", "1")).await.unwrap();

        cache.cleanup_all().await;

        assert!(a.is_closed() && b.is_closed());
        assert!(cache.is_empty().await);
    }

    #[tokio::test]
    async fn invalidate_only_touches_one_backend() {
        let connector = Arc::new(
            ScriptedConnector::new()
                .with_backend("a", MockTransport::new("A"))
                .with_backend("b", MockTransport::new("B")),
        );
        let cache = SessionCache::new(connector);
        let a = cache.session_for(&backend("a", "1")).await.unwrap();
        let b = cache.session_for(&backend("b", "1")).await.unwrap();

        assert_eq!(cache.invalidate("a").await, 1);
        assert!(a.is_closed());
        assert!(!b.is_closed());
    }
}
