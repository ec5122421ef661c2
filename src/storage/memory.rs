use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use super::repository::{ChannelPollUpdate, Repository, DUE_BATCH_LIMIT};
use super::types::{
    NewPost, Post, Source, SourceType, StorageError, Tier, TierIntervals,
    QUARANTINE_ERROR_THRESHOLD,
};

/// Process-local repository with the same contract as the Postgres one,
/// including all-or-nothing batch inserts.
#[derive(Default)]
pub struct MemoryRepository {
    state: Mutex<MemoryState>,
    fail_batch_create: AtomicBool,
}

#[derive(Default)]
struct MemoryState {
    sources: HashMap<Uuid, Source>,
    posts: Vec<Post>,
    codes: HashSet<String>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_source(&self, source: Source) {
        self.lock().sources.insert(source.id, source);
    }

    pub fn source(&self, id: Uuid) -> Option<Source> {
        self.lock().sources.get(&id).cloned()
    }

    /// Mutate a stored source in place (e.g. to age its poll timestamps).
    pub fn update_source(&self, id: Uuid, f: impl FnOnce(&mut Source)) {
        if let Some(source) = self.lock().sources.get_mut(&id) {
            f(source);
        }
    }

    /// All stored posts in insertion order.
    pub fn posts(&self) -> Vec<Post> {
        self.lock().posts.clone()
    }

    /// Make every subsequent `batch_create` fail until reset.
    pub fn fail_batch_create(&self, fail: bool) {
        self.fail_batch_create.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn due_by_type(&self, source_type: SourceType, tiers: &TierIntervals) -> Vec<Source> {
        let now = Utc::now();
        let state = self.lock();
        let mut due = Vec::new();

        for tier in Tier::ALL {
            let mut matching: Vec<&Source> = state
                .sources
                .values()
                .filter(|s| s.source_type == source_type && s.tier == tier)
                .filter(|s| elapsed(s.last_polled_at, now, tiers.interval(tier)))
                .collect();
            matching.sort_by_key(|s| s.last_polled_at);
            due.extend(matching.into_iter().take(DUE_BATCH_LIMIT).cloned());
        }
        due
    }

    fn modify(&self, id: Uuid, f: impl FnOnce(&mut Source)) -> Result<(), StorageError> {
        let mut state = self.lock();
        let source = state
            .sources
            .get_mut(&id)
            .ok_or(StorageError::SourceNotFound(id))?;
        f(source);
        Ok(())
    }
}

/// True when `last` is unset or older than `interval` before `now`.
fn elapsed(last: Option<DateTime<Utc>>, now: DateTime<Utc>, interval: Duration) -> bool {
    match last {
        None => true,
        Some(at) => chrono::Duration::from_std(interval)
            .map(|d| at < now - d)
            .unwrap_or(false),
    }
}

fn record_success(source: &mut Source) {
    let now = Utc::now();
    source.last_polled_at = Some(now);
    source.last_execution = Some(now);
    source.last_success_at = Some(now);
    source.error_count = 0;
    source.last_error = None;
    if source.tier == Tier::Quarantine {
        source.tier = Tier::Cold;
    }
}

fn record_error(source: &mut Source, message: &str) {
    source.error_count += 1;
    source.last_error = Some(message.to_owned());
    if source.error_count > QUARANTINE_ERROR_THRESHOLD {
        source.tier = Tier::Quarantine;
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn due_syndication(&self, tiers: &TierIntervals) -> Result<Vec<Source>, StorageError> {
        Ok(self.due_by_type(SourceType::Syndication, tiers))
    }

    async fn due_web(&self, tiers: &TierIntervals) -> Result<Vec<Source>, StorageError> {
        Ok(self.due_by_type(SourceType::Web, tiers))
    }

    async fn due_channels(
        &self,
        tiers: &TierIntervals,
        flood_cooldown: Duration,
    ) -> Result<Vec<Source>, StorageError> {
        let now = Utc::now();
        let state = self.lock();

        let mut due: Vec<(Tier, &Source)> = state
            .sources
            .values()
            .filter(|s| s.source_type == SourceType::Channel && s.telegram_channel_id.is_some())
            .filter(|s| elapsed(s.last_flood_wait_at, now, flood_cooldown))
            .map(|s| (s.effective_tier(now), s))
            .filter(|(tier, s)| elapsed(s.last_polled_at, now, tiers.interval(*tier)))
            .collect();

        due.sort_by_key(|(tier, s)| (*tier, s.last_polled_at));
        Ok(due
            .into_iter()
            .take(DUE_BATCH_LIMIT)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn update_poll_success(&self, id: Uuid, _new_count: usize) -> Result<(), StorageError> {
        self.modify(id, record_success)
    }

    async fn update_poll_error(&self, id: Uuid, message: &str) -> Result<(), StorageError> {
        self.modify(id, |source| {
            let now = Utc::now();
            source.last_polled_at = Some(now);
            source.last_execution = Some(now);
            record_error(source, message);
        })
    }

    async fn update_channel_poll(
        &self,
        id: Uuid,
        update: ChannelPollUpdate,
    ) -> Result<(), StorageError> {
        self.modify(id, |source| match &update.error {
            None => {
                record_success(source);
                if let Some(cursor) = update.last_message_id {
                    source.last_message_id = Some(cursor.to_string());
                }
            }
            Some(message) => {
                let now = Utc::now();
                source.last_polled_at = Some(now);
                source.last_execution = Some(now);
                if update.is_flood {
                    source.last_flood_wait_at = Some(now);
                }
                record_error(source, message);
            }
        })
    }

    async fn set_flood_wait_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        self.modify(id, |source| {
            source.last_flood_wait_at = Some(at);
            record_error(source, "flood wait");
        })
    }

    async fn batch_check_exists(&self, codes: &[String]) -> Result<HashSet<String>, StorageError> {
        let state = self.lock();
        Ok(codes
            .iter()
            .filter(|c| state.codes.contains(*c))
            .cloned()
            .collect())
    }

    async fn batch_create(&self, posts: &[NewPost]) -> Result<Vec<Uuid>, StorageError> {
        if self.fail_batch_create.load(Ordering::SeqCst) {
            return Err(StorageError::Database(sqlx::Error::PoolClosed));
        }

        let mut state = self.lock();

        // Validate the whole batch before touching state
        let mut batch_codes = HashSet::new();
        for post in posts {
            if state.codes.contains(&post.unique_code)
                || !batch_codes.insert(post.unique_code.as_str())
            {
                return Err(StorageError::Duplicate(post.unique_code.clone()));
            }
        }

        let now = Utc::now();
        let mut ids = Vec::with_capacity(posts.len());
        for post in posts {
            let id = Uuid::now_v7();
            state.codes.insert(post.unique_code.clone());
            state.posts.push(Post {
                id,
                created_at: now,
                post: post.clone(),
            });
            ids.push(id);
        }
        Ok(ids)
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StorageError> {
        Ok(self.source(id))
    }

    async fn set_priority_boost(
        &self,
        id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        self.modify(id, |source| source.priority_boost_until = Some(until))
    }
}
