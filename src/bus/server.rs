//! Request/reply responders.
//!
//! Each [`RequestHandler`] answers one subject. [`serve`] subscribes it in the
//! shared queue group so that a request reaches exactly one instance, and
//! handles every message on its own task.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::subjects::{
    QUEUE_GROUP, TELEGRAM_GET_FILE, TELEGRAM_MEDIA_WARM, TELEGRAM_REFETCH_MESSAGE,
    TELEGRAM_TRIGGER_SYNC, VALIDATION_VALIDATE_SOURCE,
};
use crate::media::{MediaWarmer, WarmReply, WarmRequest};
use crate::storage::Repository;
use crate::telegram::{FileRequest, FileResponse, RefetchRequest, TelegramFileService};
use crate::validation::{SourceValidator, ValidateReply, ValidateRequest};

/// Boost applied by `telegram.trigger_sync` when the request names none.
pub const DEFAULT_BOOST_MINUTES: i64 = 10;

#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    fn subject(&self) -> &'static str;

    /// Answer one request payload. Always produces a reply body; failures are
    /// reported inside it.
    async fn handle(&self, payload: &[u8]) -> Bytes;
}

/// Serve `handler` until `cancel` fires, then wait for in-flight replies.
pub async fn serve(
    client: async_nats::Client,
    handler: Arc<dyn RequestHandler>,
    cancel: CancellationToken,
) -> Result<(), async_nats::SubscribeError> {
    let subject = handler.subject();
    let mut subscription = client
        .queue_subscribe(subject, QUEUE_GROUP.to_string())
        .await?;
    tracing::info!(subject, queue = QUEUE_GROUP, "Responder subscribed");

    let mut in_flight = JoinSet::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    tracing::error!(subject, error = %e, "Responder task failed");
                }
            }
            message = subscription.next() => {
                let Some(message) = message else {
                    tracing::warn!(subject, "Subscription closed");
                    break;
                };
                let Some(reply) = message.reply.clone() else {
                    tracing::debug!(subject, "Dropping request without a reply subject");
                    continue;
                };
                let handler = handler.clone();
                let client = client.clone();
                in_flight.spawn(async move {
                    let body = handler.handle(&message.payload).await;
                    if let Err(e) = client.publish(reply, body).await {
                        tracing::warn!(subject, error = %e, "Failed to send reply");
                    }
                });
            }
        }
    }

    if let Err(e) = subscription.unsubscribe().await {
        tracing::debug!(subject, error = %e, "Unsubscribe failed");
    }
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            tracing::error!(subject, error = %e, "Responder task failed");
        }
    }
    tracing::info!(subject, "Responder stopped");
    Ok(())
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, String> {
    serde_json::from_slice(payload).map_err(|e| format!("invalid request: {e}"))
}

fn encode<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_vec(value) {
        Ok(body) => Bytes::from(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode reply");
            Bytes::from_static(br#"{"error":"failed to encode reply"}"#)
        }
    }
}

#[derive(Serialize)]
struct ErrorReply {
    error: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// `telegram.media.warm`
pub struct WarmHandler {
    warmer: Arc<MediaWarmer>,
}

impl WarmHandler {
    pub fn new(warmer: Arc<MediaWarmer>) -> Self {
        Self { warmer }
    }
}

#[async_trait]
impl RequestHandler for WarmHandler {
    fn subject(&self) -> &'static str {
        TELEGRAM_MEDIA_WARM
    }

    async fn handle(&self, payload: &[u8]) -> Bytes {
        let reply = match decode::<WarmRequest>(payload) {
            Ok(request) => self.warmer.warm(&request).await,
            Err(error) => WarmReply {
                error: Some(error),
                ..Default::default()
            },
        };
        encode(&reply)
    }
}

/// `telegram.get_file`
pub struct GetFileHandler {
    files: Arc<TelegramFileService>,
}

impl GetFileHandler {
    pub fn new(files: Arc<TelegramFileService>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl RequestHandler for GetFileHandler {
    fn subject(&self) -> &'static str {
        TELEGRAM_GET_FILE
    }

    async fn handle(&self, payload: &[u8]) -> Bytes {
        let reply = match decode::<FileRequest>(payload) {
            Ok(request) => self.files.handle_get_file(&request).await,
            Err(error) => FileResponse::error(error),
        };
        encode(&reply)
    }
}

/// `telegram.refetch_message`
pub struct RefetchHandler {
    files: Arc<TelegramFileService>,
}

impl RefetchHandler {
    pub fn new(files: Arc<TelegramFileService>) -> Self {
        Self { files }
    }
}

#[async_trait]
impl RequestHandler for RefetchHandler {
    fn subject(&self) -> &'static str {
        TELEGRAM_REFETCH_MESSAGE
    }

    async fn handle(&self, payload: &[u8]) -> Bytes {
        let request = match decode::<RefetchRequest>(payload) {
            Ok(request) => request,
            Err(error) => return encode(&ErrorReply { error }),
        };
        match self.files.refetch(&request).await {
            Ok(message) => encode(&message),
            Err(e) => {
                tracing::debug!(
                    chat_id = request.chat_id,
                    message_id = request.message_id,
                    error = %e,
                    "Refetch failed"
                );
                encode(&ErrorReply {
                    error: e.to_string(),
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSyncRequest {
    pub raw_feed_id: Uuid,
    #[serde(default)]
    pub boost_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerSyncReply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `telegram.trigger_sync`: boost a channel to HOT and wake its engine.
pub struct TriggerSyncHandler {
    repo: Arc<dyn Repository>,
    wake: Option<Arc<Notify>>,
}

impl TriggerSyncHandler {
    /// `wake` is the channel engine's waker, absent when that engine is off.
    pub fn new(repo: Arc<dyn Repository>, wake: Option<Arc<Notify>>) -> Self {
        Self { repo, wake }
    }

    async fn trigger(&self, request: &TriggerSyncRequest) -> TriggerSyncReply {
        let minutes = request
            .boost_minutes
            .filter(|m| *m > 0)
            .unwrap_or(DEFAULT_BOOST_MINUTES);
        let until = Utc::now() + chrono::Duration::minutes(minutes);

        if let Err(e) = self.repo.set_priority_boost(request.raw_feed_id, until).await {
            return TriggerSyncReply {
                ok: false,
                error: Some(e.to_string()),
            };
        }
        if let Some(wake) = &self.wake {
            wake.notify_one();
        }
        tracing::info!(source_id = %request.raw_feed_id, minutes, "Priority boost set");
        TriggerSyncReply {
            ok: true,
            error: None,
        }
    }
}

#[async_trait]
impl RequestHandler for TriggerSyncHandler {
    fn subject(&self) -> &'static str {
        TELEGRAM_TRIGGER_SYNC
    }

    async fn handle(&self, payload: &[u8]) -> Bytes {
        let reply = match decode::<TriggerSyncRequest>(payload) {
            Ok(request) => self.trigger(&request).await,
            Err(error) => TriggerSyncReply {
                ok: false,
                error: Some(error),
            },
        };
        encode(&reply)
    }
}

/// `validation.validate_source`
pub struct ValidateHandler {
    validator: Arc<SourceValidator>,
}

impl ValidateHandler {
    pub fn new(validator: Arc<SourceValidator>) -> Self {
        Self { validator }
    }
}

#[async_trait]
impl RequestHandler for ValidateHandler {
    fn subject(&self) -> &'static str {
        VALIDATION_VALIDATE_SOURCE
    }

    async fn handle(&self, payload: &[u8]) -> Bytes {
        let reply = match decode::<ValidateRequest>(payload) {
            Ok(request) => self.validator.validate(&request).await,
            Err(error) => ValidateReply {
                valid: false,
                error: Some(error),
                ..Default::default()
            },
        };
        encode(&reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryRepository, Source, SourceType, Tier};

    #[tokio::test]
    async fn test_trigger_sync_boosts_and_wakes() {
        let repo = Arc::new(MemoryRepository::new());
        let source = Source::new(SourceType::Channel);
        let id = source.id;
        repo.insert_source(source);

        let wake = Arc::new(Notify::new());
        let handler = TriggerSyncHandler::new(repo.clone(), Some(wake.clone()));
        let body = handler
            .handle(format!(r#"{{"raw_feed_id":"{id}"}}"#).as_bytes())
            .await;
        let reply: TriggerSyncReply = serde_json::from_slice(&body).unwrap();
        assert!(reply.ok);

        let stored = repo.source(id).unwrap();
        let until = stored.priority_boost_until.unwrap();
        assert!(until > Utc::now() + chrono::Duration::minutes(9));
        assert_eq!(stored.effective_tier(Utc::now()), Tier::Hot);

        // notify_one stores a permit when nobody is waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), wake.notified())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_trigger_sync_unknown_source() {
        let handler = TriggerSyncHandler::new(Arc::new(MemoryRepository::new()), None);
        let body = handler
            .handle(format!(r#"{{"raw_feed_id":"{}","boost_minutes":5}}"#, Uuid::new_v4()).as_bytes())
            .await;
        let reply: TriggerSyncReply = serde_json::from_slice(&body).unwrap();
        assert!(!reply.ok);
        assert!(reply.error.is_some());
    }

    #[tokio::test]
    async fn test_malformed_payload_gets_error_reply() {
        let handler = TriggerSyncHandler::new(Arc::new(MemoryRepository::new()), None);
        let body = handler.handle(b"not json").await;
        let reply: TriggerSyncReply = serde_json::from_slice(&body).unwrap();
        assert!(!reply.ok);
        assert!(reply.error.unwrap().starts_with("invalid request"));
    }
}
