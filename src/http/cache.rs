use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::client::FetchResponse;

/// Interval between expiry sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

struct CacheEntry {
    response: FetchResponse,
    expires_at: Instant,
}

/// URL-keyed cache of successful GET responses with a fixed TTL.
///
/// Bounded by an LRU so a long-running process cannot grow it without limit;
/// expired entries are dropped lazily on lookup and by [`ResponseCache::sweep`].
pub struct ResponseCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, url: &str) -> Option<FetchResponse> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(url) {
            Some(entry) if entry.expires_at > Instant::now() => {
                let mut response = entry.response.clone();
                response.from_cache = true;
                Some(response)
            }
            Some(_) => {
                entries.pop(url);
                None
            }
            None => None,
        }
    }

    /// Store a response, replacing any previous entry for `url`.
    pub fn insert(&self, url: &str, response: &FetchResponse) {
        let entry = CacheEntry {
            response: response.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .put(url.to_owned(), entry);
    }

    /// Remove expired entries, returning how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(url, _)| url.clone())
            .collect();
        for url in &expired {
            entries.pop(url);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick completes immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep();
                        if removed > 0 {
                            tracing::debug!(removed, remaining = self.len(), "Swept expired HTTP cache entries");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    fn response(body: &'static str) -> FetchResponse {
        FetchResponse {
            status: 200,
            body: Bytes::from_static(body.as_bytes()),
            headers: HeaderMap::new(),
            from_cache: false,
        }
    }

    #[test]
    fn test_hit_is_marked_from_cache() {
        let cache = ResponseCache::new(Duration::from_secs(60), 8);
        cache.insert("https://a/", &response("x"));
        let hit = cache.get("https://a/").unwrap();
        assert!(hit.from_cache);
        assert_eq!(hit.body, Bytes::from_static(b"x"));
    }

    #[test]
    fn test_insert_replaces() {
        let cache = ResponseCache::new(Duration::from_secs(60), 8);
        cache.insert("https://a/", &response("old"));
        cache.insert("https://a/", &response("new"));
        assert_eq!(cache.get("https://a/").unwrap().body, Bytes::from_static(b"new"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expired_entries_miss_and_sweep() {
        let cache = ResponseCache::new(Duration::ZERO, 8);
        cache.insert("https://a/", &response("x"));
        cache.insert("https://b/", &response("y"));
        assert_eq!(cache.sweep(), 2);
        assert!(cache.is_empty());

        cache.insert("https://c/", &response("z"));
        assert!(cache.get("https://c/").is_none());
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = ResponseCache::new(Duration::from_secs(60), 2);
        cache.insert("https://a/", &response("a"));
        cache.insert("https://b/", &response("b"));
        cache.insert("https://c/", &response("c"));
        assert!(cache.get("https://a/").is_none());
        assert!(cache.get("https://c/").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_cancel() {
        let cache = Arc::new(ResponseCache::new(Duration::ZERO, 8));
        cache.insert("https://a/", &response("x"));
        let cancel = CancellationToken::new();
        let handle = Arc::clone(&cache).spawn_sweeper(Duration::from_secs(1), cancel.clone());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.is_empty());

        cancel.cancel();
        handle.await.unwrap();
    }
}
