use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Cached channel identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCacheEntry {
    pub channel_id: i64,
    pub access_hash: i64,
    pub title: String,
}

/// Username → channel store shared between processes.
///
/// Reads treat any failure as a miss.
#[async_trait]
pub trait ChannelCache: Send + Sync {
    async fn get(&self, username: &str) -> Option<ChannelCacheEntry>;

    async fn get_by_id(&self, channel_id: i64) -> Option<(String, ChannelCacheEntry)>;

    async fn put(&self, username: &str, entry: ChannelCacheEntry);
}

/// In-process [`ChannelCache`] with a write TTL.
pub struct MemoryChannelCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (ChannelCacheEntry, Instant)>>,
}

impl MemoryChannelCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn fresh(&self, stored_at: Instant) -> bool {
        stored_at.elapsed() < self.ttl
    }
}

#[async_trait]
impl ChannelCache for MemoryChannelCache {
    async fn get(&self, username: &str) -> Option<ChannelCacheEntry> {
        let key = username.trim_start_matches('@').to_lowercase();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(&key) {
            Some((entry, at)) if self.fresh(*at) => Some(entry.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    async fn get_by_id(&self, channel_id: i64) -> Option<(String, ChannelCacheEntry)> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .iter()
            .find(|(_, (entry, at))| entry.channel_id == channel_id && self.fresh(*at))
            .map(|(name, (entry, _))| (name.clone(), entry.clone()))
    }

    async fn put(&self, username: &str, entry: ChannelCacheEntry) {
        let key = username.trim_start_matches('@').to_lowercase();
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, (entry, Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: i64) -> ChannelCacheEntry {
        ChannelCacheEntry {
            channel_id: id,
            access_hash: id * 2,
            title: format!("Channel {id}"),
        }
    }

    #[tokio::test]
    async fn test_lowercased_keys() {
        let cache = MemoryChannelCache::new(Duration::from_secs(60));
        cache.put("@SomeChannel", entry(5)).await;
        assert_eq!(cache.get("somechannel").await, Some(entry(5)));
        assert_eq!(
            cache.get_by_id(5).await,
            Some(("somechannel".to_string(), entry(5)))
        );
        assert!(cache.get_by_id(6).await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_miss() {
        let cache = MemoryChannelCache::new(Duration::ZERO);
        cache.put("chan", entry(1)).await;
        assert!(cache.get("chan").await.is_none());
        assert!(cache.get_by_id(1).await.is_none());
    }
}
