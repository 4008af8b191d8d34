//! Short-lived cache for control-plane fetches

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

/// How long a fetched value satisfies forced refreshes
pub const DEFAULT_TTL: Duration = Duration::from_secs(1);

struct Entry<T> {
    value: T,
    fetched_at: Instant,
}

/// Single-value cache with stale-on-error fallback.
///
/// A cached value is returned when present and either the caller did not
/// force a refresh or the value is younger than the TTL. Otherwise the
/// value is refetched; if that fails the previous value (however old) is
/// returned, and only with no previous value does the error surface.
///
/// Concurrent callers share one fetch.
pub struct TtlCache<T> {
    ttl: Duration,
    entry: Mutex<Option<Entry<T>>>,
}

impl<T: Clone> Default for TtlCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get<F, Fut, E>(&self, force_refresh: bool, fetch: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut entry = self.entry.lock().await;

        if let Some(cached) = entry.as_ref() {
            if !force_refresh || cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.value.clone());
            }
        }

        match fetch().await {
            Ok(value) => {
                *entry = Some(Entry {
                    value: value.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(value)
            }
            Err(e) => match entry.as_ref() {
                Some(cached) => {
                    warn!(error = %e, "Refresh failed, serving cached value");
                    Ok(cached.value.clone())
                }
                None => Err(e),
            },
        }
    }

    /// The cached value, if any, without fetching
    pub async fn peek(&self) -> Option<T> {
        self.entry.lock().await.as_ref().map(|e| e.value.clone())
    }

    pub async fn clear(&self) {
        *self.entry.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn fetch_n(counter: &AtomicUsize) -> Result<usize, String> {
        Ok(counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    #[tokio::test(start_paused = true)]
    async fn unforced_reads_never_refetch() {
        let cache = TtlCache::new(Duration::from_secs(1));
        let counter = AtomicUsize::new(0);

        assert_eq!(cache.get(false, || fetch_n(&counter)).await, Ok(1));
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(cache.get(false, || fetch_n(&counter)).await, Ok(1));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn forced_reads_respect_ttl() {
        let cache = TtlCache::new(Duration::from_secs(1));
        let counter = AtomicUsize::new(0);

        assert_eq!(cache.get(true, || fetch_n(&counter)).await, Ok(1));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(cache.get(true, || fetch_n(&counter)).await, Ok(1));

        tokio::time::advance(Duration::from_millis(600)).await;
        assert_eq!(cache.get(true, || fetch_n(&counter)).await, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_serves_stale_value() {
        let cache = TtlCache::new(Duration::from_secs(1));
        assert_eq!(cache.get(true, || async { Ok::<_, String>(7) }).await, Ok(7));

        tokio::time::advance(Duration::from_secs(5)).await;
        let value = cache
            .get(true, || async { Err::<u32, _>("down".to_string()) })
            .await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn failure_without_cache_surfaces() {
        let cache: TtlCache<u32> = TtlCache::default();
        let value = cache
            .get(true, || async { Err::<u32, _>("down".to_string()) })
            .await;
        assert_eq!(value, Err("down".to_string()));
        assert!(cache.peek().await.is_none());
    }
}
