use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

use super::schema::PgRepository;
use super::types::{NewPost, Source, StorageError, TierIntervals};

/// Maximum sources returned per tier (or per call for channels).
pub const DUE_BATCH_LIMIT: usize = 50;

/// Outcome of one channel poll, applied by [`Repository::update_channel_poll`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelPollUpdate {
    /// Largest message ID seen, stored as the new cursor on success
    pub last_message_id: Option<i64>,
    pub error: Option<String>,
    pub is_flood: bool,
}

impl ChannelPollUpdate {
    pub fn success(last_message_id: Option<i64>) -> Self {
        Self {
            last_message_id,
            error: None,
            is_flood: false,
        }
    }

    pub fn failure(error: impl Into<String>, is_flood: bool) -> Self {
        Self {
            last_message_id: None,
            error: Some(error.into()),
            is_flood,
        }
    }
}

/// Persistence operations the engines and responders depend on.
///
/// Implemented by [`PgRepository`] for production and
/// [`MemoryRepository`](super::MemoryRepository) for tests and dry runs.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Due SYNDICATION sources: up to 50 per tier, oldest poll first.
    async fn due_syndication(&self, tiers: &TierIntervals) -> Result<Vec<Source>, StorageError>;

    /// Due WEB sources: up to 50 per tier, oldest poll first.
    async fn due_web(&self, tiers: &TierIntervals) -> Result<Vec<Source>, StorageError>;

    /// Due CHANNEL sources, scheduled by effective tier and excluding those
    /// inside the flood-wait cooldown. Ordered HOT first, then oldest poll.
    async fn due_channels(
        &self,
        tiers: &TierIntervals,
        flood_cooldown: Duration,
    ) -> Result<Vec<Source>, StorageError>;

    /// Successful poll: stamp poll times, reset errors, QUARANTINE → COLD.
    async fn update_poll_success(&self, id: Uuid, new_count: usize) -> Result<(), StorageError>;

    /// Failed poll: stamp poll times, increment errors, QUARANTINE past threshold.
    async fn update_poll_error(&self, id: Uuid, message: &str) -> Result<(), StorageError>;

    async fn update_channel_poll(
        &self,
        id: Uuid,
        update: ChannelPollUpdate,
    ) -> Result<(), StorageError>;

    /// Record a flood-wait: stamp the time, increment errors, QUARANTINE past threshold.
    async fn set_flood_wait_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError>;

    /// Subset of `codes` already committed.
    async fn batch_check_exists(&self, codes: &[String]) -> Result<HashSet<String>, StorageError>;

    /// Insert every post in one transaction, returning their IDs in input order.
    /// Nothing is stored if any row fails.
    async fn batch_create(&self, posts: &[NewPost]) -> Result<Vec<Uuid>, StorageError>;

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StorageError>;

    /// Schedule a source as HOT until `until`.
    async fn set_priority_boost(&self, id: Uuid, until: DateTime<Utc>)
        -> Result<(), StorageError>;
}

#[async_trait]
impl Repository for PgRepository {
    async fn due_syndication(&self, tiers: &TierIntervals) -> Result<Vec<Source>, StorageError> {
        self.due_by_type(super::SourceType::Syndication, tiers).await
    }

    async fn due_web(&self, tiers: &TierIntervals) -> Result<Vec<Source>, StorageError> {
        self.due_by_type(super::SourceType::Web, tiers).await
    }

    async fn due_channels(
        &self,
        tiers: &TierIntervals,
        flood_cooldown: Duration,
    ) -> Result<Vec<Source>, StorageError> {
        PgRepository::due_channels(self, tiers, flood_cooldown).await
    }

    async fn update_poll_success(&self, id: Uuid, new_count: usize) -> Result<(), StorageError> {
        PgRepository::update_poll_success(self, id, new_count).await
    }

    async fn update_poll_error(&self, id: Uuid, message: &str) -> Result<(), StorageError> {
        PgRepository::update_poll_error(self, id, message).await
    }

    async fn update_channel_poll(
        &self,
        id: Uuid,
        update: ChannelPollUpdate,
    ) -> Result<(), StorageError> {
        PgRepository::update_channel_poll(self, id, &update).await
    }

    async fn set_flood_wait_at(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StorageError> {
        PgRepository::set_flood_wait_at(self, id, at).await
    }

    async fn batch_check_exists(&self, codes: &[String]) -> Result<HashSet<String>, StorageError> {
        PgRepository::batch_check_exists(self, codes).await
    }

    async fn batch_create(&self, posts: &[NewPost]) -> Result<Vec<Uuid>, StorageError> {
        PgRepository::batch_create(self, posts).await
    }

    async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StorageError> {
        PgRepository::get_source(self, id).await
    }

    async fn set_priority_boost(
        &self,
        id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        PgRepository::set_priority_boost(self, id, until).await
    }
}
