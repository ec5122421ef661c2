use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

use super::subjects::{posts_subject, POSTS_STREAM, POSTS_STREAM_SUBJECTS};
use crate::storage::{Source, SourceType};

pub const RAW_POST_CREATED: &str = "raw_post.created";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("NATS publish failed: {0}")]
    Nats(String),

    #[error("Stream setup failed: {0}")]
    Stream(String),
}

/// Publish operations on the durable bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError>;
}

// ============================================================================
// JetStream
// ============================================================================

/// JetStream publisher; each publish waits for the server ack.
pub struct NatsPublisher {
    jetstream: async_nats::jetstream::Context,
}

impl NatsPublisher {
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: async_nats::jetstream::new(client),
        }
    }

    /// Create the posts stream if it does not exist.
    pub async fn ensure_stream(&self) -> Result<(), PublishError> {
        self.jetstream
            .get_or_create_stream(async_nats::jetstream::stream::Config {
                name: POSTS_STREAM.to_string(),
                subjects: vec![POSTS_STREAM_SUBJECTS.to_string()],
                ..Default::default()
            })
            .await
            .map_err(|e| PublishError::Stream(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for NatsPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| PublishError::Nats(e.to_string()))?;
        ack.await.map_err(|e| PublishError::Nats(e.to_string()))?;
        Ok(())
    }
}

// ============================================================================
// Recording double
// ============================================================================

#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub subject: String,
    pub payload: Bytes,
}

/// Publisher that keeps every message in memory.
#[derive(Default)]
pub struct RecordingPublisher {
    published: RwLock<Vec<PublishedMessage>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_messages(&self) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn messages_for_subject(&self, subject: &str) -> Vec<PublishedMessage> {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    pub fn publish_count(&self) -> usize {
        self.published
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Decoded `raw_post.created` envelopes on `subject`.
    pub fn events_for_subject(&self, subject: &str) -> Vec<RawPostCreated> {
        self.messages_for_subject(subject)
            .iter()
            .filter_map(|m| serde_json::from_slice(&m.payload).ok())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        self.published
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(PublishedMessage {
                subject: subject.to_string(),
                payload,
            });
        Ok(())
    }
}

// ============================================================================
// Envelope
// ============================================================================

/// `raw_post.created` event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPostCreated {
    pub event_type: String,
    pub event_id: Uuid,
    #[serde(serialize_with = "rfc3339_nanos")]
    pub timestamp: DateTime<Utc>,
    pub raw_feed_id: Uuid,
    pub raw_feed_type: SourceType,
    pub raw_post_ids: Vec<Uuid>,
    pub source_identifier: String,
}

impl RawPostCreated {
    pub fn new(source: &Source, post_ids: &[Uuid]) -> Self {
        Self {
            event_type: RAW_POST_CREATED.to_string(),
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            raw_feed_id: source.id,
            raw_feed_type: source.source_type,
            raw_post_ids: post_ids.to_vec(),
            source_identifier: source.identifier(),
        }
    }
}

fn rfc3339_nanos<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Nanos, true))
}

/// Announces newly stored posts. Disabled instances publish nothing.
#[derive(Clone)]
pub struct PostEvents {
    publisher: Arc<dyn EventPublisher>,
    enabled: bool,
}

impl PostEvents {
    pub fn new(publisher: Arc<dyn EventPublisher>, enabled: bool) -> Self {
        Self { publisher, enabled }
    }

    /// Publish one envelope for `post_ids`. Returns whether anything was sent.
    pub async fn publish_created(
        &self,
        source: &Source,
        post_ids: &[Uuid],
    ) -> Result<bool, PublishError> {
        if !self.enabled || post_ids.is_empty() {
            return Ok(false);
        }
        let Some(subject) = posts_subject(source.source_type) else {
            tracing::debug!(source_type = %source.source_type, "No subject for source type");
            return Ok(false);
        };

        let event = RawPostCreated::new(source, post_ids);
        let payload = serde_json::to_vec(&event)?;
        self.publisher.publish(subject, Bytes::from(payload)).await?;
        tracing::debug!(
            subject = %subject,
            source_id = %source.id,
            posts = post_ids.len(),
            "Published raw_post.created"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::subjects::POSTS_NEW_SYNDICATION;

    fn source() -> Source {
        let mut s = Source::new(SourceType::Syndication);
        s.feed_url = Some("https://example.com/rss".into());
        s
    }

    #[test]
    fn test_envelope_shape() {
        let ids = vec![Uuid::new_v4()];
        let event = RawPostCreated::new(&source(), &ids);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["event_type"], "raw_post.created");
        assert_eq!(json["raw_feed_type"], "SYNDICATION");
        assert_eq!(json["source_identifier"], "https://example.com/rss");
        assert_eq!(json["raw_post_ids"][0], ids[0].to_string());
        let ts = json["timestamp"].as_str().unwrap();
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.split('.').nth(1).map(|f| f.len()), Some(10)); // 9 digits + Z
    }

    #[tokio::test]
    async fn test_publish_created() {
        let recorder = Arc::new(RecordingPublisher::new());
        let events = PostEvents::new(recorder.clone(), true);
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];

        assert!(events.publish_created(&source(), &ids).await.unwrap());
        assert!(!events.publish_created(&source(), &[]).await.unwrap());

        let sent = recorder.events_for_subject(POSTS_NEW_SYNDICATION);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].raw_post_ids, ids);
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let recorder = Arc::new(RecordingPublisher::new());
        let events = PostEvents::new(recorder.clone(), false);
        assert!(!events
            .publish_created(&source(), &[Uuid::new_v4()])
            .await
            .unwrap());
        assert_eq!(recorder.publish_count(), 0);
    }
}
