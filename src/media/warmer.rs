//! On-demand copying of Telegram media into object storage.
//!
//! A warm request lists media objects; photos are warmed by URL, videos and
//! animations by their preview. Keys already in the bucket are skipped after
//! one listing per kind prefix. The rest are fetched through a [`FileSource`]
//! under a global rate limit and a concurrency cap, and uploaded with their
//! MIME type.

use async_trait::async_trait;
use base64::Engine as _;
use futures::TryStreamExt;
use governor::{DefaultDirectRateLimiter, RateLimiter};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::url::{parse_media_url, MediaRef};
use crate::bus::subjects::TELEGRAM_GET_FILE;
use crate::config::MediaWarmingConfig;
use crate::http::quota_for;
use crate::telegram::{FileRequest, FileResponse};

const DEFAULT_MIME: &str = "application/octet-stream";

#[derive(Debug, Error)]
pub enum WarmError {
    #[error("File transport failed: {0}")]
    Transport(String),

    #[error("File source reported: {0}")]
    Remote(String),

    #[error("Invalid base64 payload: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Object store error: {0}")]
    Store(#[from] object_store::Error),
}

/// Where warmed files come from.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn get_file(&self, request: &FileRequest) -> Result<FileResponse, WarmError>;
}

/// [`FileSource`] that asks another process over `telegram.get_file`.
pub struct NatsFileSource {
    client: async_nats::Client,
    timeout: Duration,
}

impl NatsFileSource {
    pub fn new(client: async_nats::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }
}

#[async_trait]
impl FileSource for NatsFileSource {
    async fn get_file(&self, request: &FileRequest) -> Result<FileResponse, WarmError> {
        let payload = serde_json::to_vec(request).map_err(|e| WarmError::Transport(e.to_string()))?;
        let reply = tokio::time::timeout(
            self.timeout,
            self.client.request(TELEGRAM_GET_FILE, payload.into()),
        )
        .await
        .map_err(|_| WarmError::Transport("request timed out".to_string()))?
        .map_err(|e| WarmError::Transport(e.to_string()))?;
        serde_json::from_slice(&reply.payload).map_err(|e| WarmError::Transport(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarmMediaObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub preview_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmRequest {
    #[serde(default)]
    pub media_objects: Vec<WarmMediaObject>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarmReply {
    pub warmed: usize,
    pub skipped: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WarmerConfig {
    pub requests_per_sec: u32,
    pub concurrency: usize,
    /// Budget for a whole batch
    pub timeout: Duration,
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: 5,
            concurrency: 3,
            timeout: Duration::from_secs(120),
        }
    }
}

impl From<&MediaWarmingConfig> for WarmerConfig {
    fn from(config: &MediaWarmingConfig) -> Self {
        Self {
            requests_per_sec: config.requests_per_sec.max(1),
            concurrency: config.concurrency.max(1),
            timeout: Duration::from_secs(config.timeout_seconds.max(1)),
        }
    }
}

enum Outcome {
    Warmed,
    Failed,
}

pub struct MediaWarmer {
    store: Arc<dyn ObjectStore>,
    files: Arc<dyn FileSource>,
    limiter: Arc<DefaultDirectRateLimiter>,
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl MediaWarmer {
    pub fn new(store: Arc<dyn ObjectStore>, files: Arc<dyn FileSource>, config: WarmerConfig) -> Self {
        let quota = quota_for(f64::from(config.requests_per_sec), config.requests_per_sec);
        Self {
            store,
            files,
            limiter: Arc::new(RateLimiter::direct(quota)),
            permits: Arc::new(Semaphore::new(config.concurrency.max(1))),
            timeout: config.timeout,
        }
    }

    /// Warm every eligible object of `request`. Never fails; problems are
    /// reflected in the counts and `error`.
    pub async fn warm(&self, request: &WarmRequest) -> WarmReply {
        let targets = select_targets(request);
        let mut reply = WarmReply::default();
        if targets.is_empty() {
            return reply;
        }

        let existing = self.existing_keys(&targets).await;
        let mut tasks = JoinSet::new();
        for target in targets {
            let path = ObjectPath::from(target.object_key());
            if existing.contains(path.as_ref()) {
                reply.skipped += 1;
                record("skipped");
                continue;
            }

            let store = self.store.clone();
            let files = self.files.clone();
            let limiter = self.limiter.clone();
            let permits = self.permits.clone();
            tasks.spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return Outcome::Failed;
                };
                limiter.until_ready().await;
                match warm_one(store.as_ref(), files.as_ref(), &target, path).await {
                    Ok(()) => Outcome::Warmed,
                    Err(e) => {
                        tracing::warn!(key = %target.object_key(), error = %e, "Media warm failed");
                        Outcome::Failed
                    }
                }
            });
        }

        let drain = async {
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(Outcome::Warmed) => {
                        reply.warmed += 1;
                        record("warmed");
                    }
                    Ok(Outcome::Failed) | Err(_) => {
                        reply.failed += 1;
                        record("failed");
                    }
                }
            }
        };

        if tokio::time::timeout(self.timeout, drain).await.is_err() {
            tracing::warn!(
                timeout = ?self.timeout,
                warmed = reply.warmed,
                "Media warm batch timed out, returning partial counts"
            );
            reply.error = Some(format!("batch timed out after {:?}", self.timeout));
        }

        reply
    }

    /// Keys present under every distinct `{kind}/` prefix of `targets`.
    async fn existing_keys(&self, targets: &[MediaRef]) -> HashSet<String> {
        let prefixes: HashSet<&str> = targets.iter().map(|t| t.kind.as_str()).collect();
        let mut keys = HashSet::new();
        for prefix in prefixes {
            let prefix_path = ObjectPath::from(prefix);
            let listed: Result<Vec<_>, _> =
                self.store.list(Some(&prefix_path)).try_collect().await;
            match listed {
                Ok(metas) => keys.extend(metas.into_iter().map(|m| m.location.to_string())),
                Err(e) => tracing::warn!(prefix = %prefix, error = %e, "Bucket listing failed"),
            }
        }
        keys
    }
}

/// Media references to warm: photo URLs and video/animation previews,
/// deduplicated, unparseable URLs dropped.
fn select_targets(request: &WarmRequest) -> Vec<MediaRef> {
    let mut seen = HashSet::new();
    request
        .media_objects
        .iter()
        .filter_map(|m| match m.kind.as_str() {
            "photo" => Some(m.url.as_str()),
            "video" | "animation" => m.preview_url.as_deref(),
            _ => None,
        })
        .filter_map(|url| {
            let parsed = parse_media_url(url);
            if parsed.is_none() {
                tracing::debug!(url = %url, "Skipping unparseable media URL");
            }
            parsed
        })
        .filter(|r| seen.insert(r.object_key()))
        .collect()
}

async fn warm_one(
    store: &dyn ObjectStore,
    files: &dyn FileSource,
    target: &MediaRef,
    path: ObjectPath,
) -> Result<(), WarmError> {
    let request = FileRequest {
        file_id: target.file_id.clone(),
        file_type: target.kind.to_string(),
        chat_id: target.chat_id,
        msg_id: target.msg_id,
    };
    let response = files.get_file(&request).await?;
    if let Some(error) = response.error {
        return Err(WarmError::Remote(error));
    }
    let data = response
        .data
        .ok_or_else(|| WarmError::Remote("empty response".to_string()))?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(data)?;

    let mime = response
        .mime_type
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME.to_string());
    let mut attributes = Attributes::new();
    attributes.insert(Attribute::ContentType, mime.into());
    let options = PutOptions {
        attributes,
        ..Default::default()
    };

    store.put_opts(&path, PutPayload::from(bytes), options).await?;
    Ok(())
}

fn record(outcome: &'static str) {
    metrics::counter!("harvester_media_warm_total", "outcome" => outcome).increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::build_media_url;
    use crate::storage::MediaKind;
    use object_store::memory::InMemory;
    use std::sync::Mutex;

    struct StaticFiles {
        calls: Mutex<Vec<FileRequest>>,
        fail: bool,
    }

    impl StaticFiles {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl FileSource for StaticFiles {
        async fn get_file(&self, request: &FileRequest) -> Result<FileResponse, WarmError> {
            self.calls.lock().unwrap().push(request.clone());
            if self.fail {
                return Ok(FileResponse::error("FILE_REFERENCE_EXPIRED"));
            }
            Ok(FileResponse {
                data: Some(base64::engine::general_purpose::STANDARD.encode(b"jpeg-bytes")),
                mime_type: Some("image/jpeg".into()),
                size: Some(10),
                error: None,
            })
        }
    }

    fn photo(file_id: &str) -> WarmMediaObject {
        WarmMediaObject {
            kind: "photo".into(),
            url: build_media_url("https://m.example", MediaKind::Photo, file_id, -100, 5),
            preview_url: None,
        }
    }

    fn warmer(store: Arc<InMemory>, files: Arc<StaticFiles>) -> MediaWarmer {
        MediaWarmer::new(
            store,
            files,
            WarmerConfig {
                requests_per_sec: 1000,
                concurrency: 2,
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn test_select_targets() {
        let request = WarmRequest {
            media_objects: vec![
                photo("1_2"),
                photo("1_2"),
                WarmMediaObject {
                    kind: "video".into(),
                    url: "https://m.example/media/tg/video/3_4?chat=1&msg=1".into(),
                    preview_url: Some("https://m.example/media/tg/photo/thumb_3_4?chat=1&msg=1".into()),
                },
                WarmMediaObject {
                    kind: "video".into(),
                    url: "https://m.example/media/tg/video/5_6?chat=1&msg=1".into(),
                    preview_url: None,
                },
                WarmMediaObject {
                    kind: "document".into(),
                    url: "https://m.example/media/tg/document/7_8?chat=1&msg=1".into(),
                    preview_url: None,
                },
                WarmMediaObject {
                    kind: "photo".into(),
                    url: "https://elsewhere.example/a.jpg".into(),
                    preview_url: None,
                },
            ],
        };
        let keys: Vec<String> = select_targets(&request).iter().map(|r| r.object_key()).collect();
        assert_eq!(keys, vec!["photo/1_2", "photo/thumb_3_4"]);
    }

    #[tokio::test]
    async fn test_existing_key_is_skipped() {
        let store = Arc::new(InMemory::new());
        store
            .put(&ObjectPath::from("photo/1_2"), PutPayload::from_static(b"old"))
            .await
            .unwrap();
        let files = StaticFiles::new(false);

        let reply = warmer(store, files.clone())
            .warm(&WarmRequest {
                media_objects: vec![photo("1_2")],
            })
            .await;

        assert_eq!(
            reply,
            WarmReply {
                warmed: 0,
                skipped: 1,
                failed: 0,
                error: None
            }
        );
        assert!(files.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_uploaded() {
        let store = Arc::new(InMemory::new());
        let files = StaticFiles::new(false);

        let reply = warmer(store.clone(), files.clone())
            .warm(&WarmRequest {
                media_objects: vec![photo("9_9")],
            })
            .await;

        assert_eq!(reply.warmed, 1);
        let stored = store.get(&ObjectPath::from("photo/9_9")).await.unwrap();
        assert_eq!(
            stored
                .attributes
                .get(&Attribute::ContentType)
                .map(AsRef::<str>::as_ref),
            Some("image/jpeg")
        );
        assert_eq!(stored.bytes().await.unwrap().as_ref(), b"jpeg-bytes");

        let calls = files.calls.lock().unwrap();
        assert_eq!(calls[0].file_id, "9_9");
        assert_eq!(calls[0].file_type, "photo");
        assert_eq!(calls[0].chat_id, -100);
        assert_eq!(calls[0].msg_id, 5);
    }

    #[tokio::test]
    async fn test_source_errors_count_as_failed() {
        let store = Arc::new(InMemory::new());
        let reply = warmer(store, StaticFiles::new(true))
            .warm(&WarmRequest {
                media_objects: vec![photo("1_1"), photo("2_2")],
            })
            .await;
        assert_eq!(reply.failed, 2);
        assert_eq!(reply.warmed, 0);
    }
}
