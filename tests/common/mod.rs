//! Shared fixtures for the integration tests: a scripted MTProto API, an
//! ingestion tail wired to in-memory doubles, and message builders.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvester::bus::{EventPublisher, PostEvents, PublishError, RecordingPublisher};
use harvester::moderation::ModerationClient;
use harvester::poller::Ingest;
use harvester::storage::MemoryRepository;
use harvester::telegram::{
    unmark_channel_id, ChannelPeer, FileLocation, PhotoSize, RawMedia, RawMessage, RawPhoto,
    SessionStore, TelegramApi, TelegramClient, TelegramConnector, TelegramError,
};

pub const CHANNEL_ID: i64 = 1_234_567;

/// Repository, publisher and the ingest tail built over them.
pub struct Harness {
    pub repo: Arc<MemoryRepository>,
    pub publisher: Arc<RecordingPublisher>,
    pub ingest: Ingest,
}

pub fn harness() -> Harness {
    harness_with(ModerationClient::disabled())
}

pub fn harness_with(moderation: ModerationClient) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let ingest = Ingest::new(
        repo.clone(),
        moderation,
        PostEvents::new(publisher.clone(), true),
    );
    Harness {
        repo,
        publisher,
        ingest,
    }
}

/// Harness whose publisher takes `delay` before recording each event.
pub fn harness_with_publish_delay(delay: Duration) -> Harness {
    let repo = Arc::new(MemoryRepository::new());
    let publisher = Arc::new(RecordingPublisher::new());
    let delayed = Arc::new(DelayedPublisher {
        inner: publisher.clone(),
        delay,
    });
    let ingest = Ingest::new(
        repo.clone(),
        ModerationClient::disabled(),
        PostEvents::new(delayed, true),
    );
    Harness {
        repo,
        publisher,
        ingest,
    }
}

pub struct DelayedPublisher {
    inner: Arc<RecordingPublisher>,
    delay: Duration,
}

#[async_trait]
impl EventPublisher for DelayedPublisher {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), PublishError> {
        tokio::time::sleep(self.delay).await;
        self.inner.publish(subject, payload).await
    }
}

// ============================================================================
// Scripted MTProto API
// ============================================================================

/// Serves a fixed history, or a flood-wait when one is armed.
#[derive(Default)]
pub struct ScriptedApi {
    pub history: Mutex<Vec<RawMessage>>,
    pub flood_wait: Mutex<Option<u32>>,
    pub history_calls: AtomicUsize,
    pub file_calls: AtomicUsize,
}

impl ScriptedApi {
    pub fn with_history(history: Vec<RawMessage>) -> Arc<Self> {
        let api = Self::default();
        *api.history.lock().unwrap() = history;
        Arc::new(api)
    }

    pub fn arm_flood_wait(&self, seconds: u32) {
        *self.flood_wait.lock().unwrap() = Some(seconds);
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelegramApi for ScriptedApi {
    async fn resolve_username(&self, username: &str) -> Result<ChannelPeer, TelegramError> {
        Ok(ChannelPeer {
            channel_id: CHANNEL_ID,
            access_hash: 42,
            title: "Scripted".into(),
            username: Some(username.into()),
        })
    }

    async fn get_history(
        &self,
        _peer: &ChannelPeer,
        limit: i32,
        offset_id: i32,
    ) -> Result<Vec<RawMessage>, TelegramError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(seconds) = *self.flood_wait.lock().unwrap() {
            return Err(TelegramError::FloodWait { seconds });
        }
        // Newest first, like the server
        let mut history = self.history.lock().unwrap().clone();
        if offset_id > 0 {
            history.retain(|m| m.id < offset_id);
        }
        history.sort_by(|a, b| b.id.cmp(&a.id));
        history.truncate(limit.max(0) as usize);
        Ok(history)
    }

    async fn get_messages(
        &self,
        _peer: &ChannelPeer,
        ids: &[i32],
    ) -> Result<Vec<RawMessage>, TelegramError> {
        Ok(self
            .history
            .lock()
            .unwrap()
            .iter()
            .filter(|m| ids.contains(&m.id))
            .cloned()
            .collect())
    }

    async fn get_file_chunk(
        &self,
        _location: &FileLocation,
        _offset: i64,
        _limit: i32,
    ) -> Result<Vec<u8>, TelegramError> {
        self.file_calls.fetch_add(1, Ordering::SeqCst);
        Ok(b"jpeg".to_vec())
    }

    fn bare_channel_id(&self, chat_id: i64) -> i64 {
        unmark_channel_id(chat_id)
    }
}

struct ScriptedConnector {
    api: Arc<ScriptedApi>,
}

#[async_trait]
impl TelegramConnector for ScriptedConnector {
    async fn connect(&self, _session: Vec<u8>) -> Result<Arc<dyn TelegramApi>, TelegramError> {
        Ok(self.api.clone())
    }
}

/// A connected client over `api`. Keep the directory alive for the test.
pub async fn connected_client(api: Arc<ScriptedApi>) -> (Arc<TelegramClient>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::new(dir.path().join("test.session"));
    store.save(b"session").unwrap();
    let client = TelegramClient::new(Arc::new(ScriptedConnector { api }), store);
    client.connect().await.unwrap();
    (Arc::new(client), dir)
}

// ============================================================================
// Message builders
// ============================================================================

pub fn photo_message(id: i32, text: &str, grouped_id: Option<i64>) -> RawMessage {
    RawMessage {
        id,
        date: 1_700_000_000 + i64::from(id),
        text: text.into(),
        grouped_id,
        media: Some(RawMedia::Photo(RawPhoto {
            id: 9_000 + i64::from(id),
            access_hash: 7,
            file_reference: vec![1, 2, 3],
            sizes: vec![PhotoSize {
                kind: "y".into(),
                width: 1280,
                height: 720,
            }],
        })),
    }
}

pub fn text_message(id: i32, text: &str) -> RawMessage {
    RawMessage {
        id,
        date: 1_700_000_000 + i64::from(id),
        text: text.into(),
        grouped_id: None,
        media: None,
    }
}
