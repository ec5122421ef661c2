use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use super::api::{ChannelPeer, FileLocation, RawMessage, TelegramApi, TelegramConnector};
use super::cache::{ChannelCache, ChannelCacheEntry};
use super::session::SessionStore;
use super::TelegramError;

/// Download chunk size.
pub const CHUNK_SIZE: usize = 1024 * 1024; // 1MB
/// Largest file accepted by [`TelegramClient::download_file`].
pub const MAX_FILE_SIZE: usize = 50 * 1024 * 1024; // 50MB

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection façade over a [`TelegramApi`].
///
/// The API handle lives behind a read-write lock: every call takes a read
/// lock to clone the handle, and only `connect`/`close` write. Resolved
/// channels are memoised per lowercased username.
pub struct TelegramClient {
    connector: Arc<dyn TelegramConnector>,
    session: SessionStore,
    api: RwLock<Option<Arc<dyn TelegramApi>>>,
    peers: RwLock<HashMap<String, ChannelPeer>>,
    channel_cache: Option<Arc<dyn ChannelCache>>,
    connect_timeout: Duration,
}

impl TelegramClient {
    pub fn new(connector: Arc<dyn TelegramConnector>, session: SessionStore) -> Self {
        Self {
            connector,
            session,
            api: RwLock::new(None),
            peers: RwLock::new(HashMap::new()),
            channel_cache: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_channel_cache(mut self, cache: Arc<dyn ChannelCache>) -> Self {
        self.channel_cache = Some(cache);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Connect using the stored session.
    ///
    /// # Errors
    ///
    /// - `Session(Missing)` when no session file exists
    /// - `ConnectDeadline` when the library is not ready within the guard
    pub async fn connect(&self) -> Result<(), TelegramError> {
        if self.is_connected() {
            return Ok(());
        }

        let blob = self.session.load()?;
        let api = tokio::time::timeout(self.connect_timeout, self.connector.connect(blob))
            .await
            .map_err(|_| TelegramError::ConnectDeadline(self.connect_timeout))??;

        *self.api.write().unwrap_or_else(|e| e.into_inner()) = Some(api);
        tracing::info!(session = %self.session.path().display(), "Telegram client connected");
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.api.read().unwrap_or_else(|e| e.into_inner()).is_some()
    }

    /// Persist the session and drop the connection.
    pub async fn close(&self) {
        let api = self.api.write().unwrap_or_else(|e| e.into_inner()).take();
        let Some(api) = api else {
            return;
        };
        if let Some(blob) = api.session_blob() {
            if let Err(e) = self.session.save(&blob) {
                tracing::warn!(error = %e, "Failed to persist Telegram session");
            }
        }
        api.disconnect().await;
        tracing::info!("Telegram client disconnected");
    }

    fn api(&self) -> Result<Arc<dyn TelegramApi>, TelegramError> {
        self.api
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(TelegramError::NotConnected)
    }

    /// Resolve `@username` (or `username`) to a channel peer.
    pub async fn resolve_channel(&self, username: &str) -> Result<ChannelPeer, TelegramError> {
        let username = username.trim().trim_start_matches('@');
        let key = username.to_lowercase();

        if let Some(peer) = self
            .peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&key)
        {
            return Ok(peer.clone());
        }

        let api = self.api()?;
        let peer = match api.resolve_username(username).await {
            Ok(peer) => peer,
            Err(e @ TelegramError::FloodWait { .. }) => return Err(e),
            Err(TelegramError::ChannelUnavailable { reason, .. }) => {
                return Err(TelegramError::ChannelUnavailable {
                    username: username.to_owned(),
                    reason,
                })
            }
            Err(e) => {
                return Err(TelegramError::ChannelUnavailable {
                    username: username.to_owned(),
                    reason: e.to_string(),
                })
            }
        };

        self.peers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), peer.clone());
        if let Some(cache) = &self.channel_cache {
            cache
                .put(
                    &key,
                    ChannelCacheEntry {
                        channel_id: peer.channel_id,
                        access_hash: peer.access_hash,
                        title: peer.title.clone(),
                    },
                )
                .await;
        }
        Ok(peer)
    }

    /// Channel metadata for validation.
    pub async fn get_channel_info(&self, username: &str) -> Result<ChannelPeer, TelegramError> {
        self.resolve_channel(username).await
    }

    /// Locate a channel by (possibly marked) numeric ID using previously
    /// resolved peers and the shared channel cache.
    pub async fn peer_for_chat(&self, chat_id: i64) -> Result<ChannelPeer, TelegramError> {
        let api = self.api()?;
        let channel_id = api.bare_channel_id(chat_id);

        let known = self
            .peers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .find(|p| p.channel_id == channel_id)
            .cloned();
        if let Some(peer) = known {
            return Ok(peer);
        }

        if let Some(cache) = &self.channel_cache {
            if let Some((username, entry)) = cache.get_by_id(channel_id).await {
                return Ok(ChannelPeer {
                    channel_id: entry.channel_id,
                    access_hash: entry.access_hash,
                    title: entry.title,
                    username: Some(username),
                });
            }
        }

        Err(TelegramError::ChannelUnavailable {
            username: chat_id.to_string(),
            reason: "access hash unknown".to_string(),
        })
    }

    pub async fn get_history(
        &self,
        peer: &ChannelPeer,
        limit: usize,
        offset_id: i32,
    ) -> Result<Vec<RawMessage>, TelegramError> {
        let limit = i32::try_from(limit).unwrap_or(i32::MAX);
        self.api()?.get_history(peer, limit, offset_id).await
    }

    pub async fn get_message(
        &self,
        peer: &ChannelPeer,
        message_id: i64,
    ) -> Result<RawMessage, TelegramError> {
        let not_found = || TelegramError::MessageNotFound {
            chat_id: peer.channel_id,
            message_id,
        };
        let id = i32::try_from(message_id).map_err(|_| not_found())?;
        self.api()?
            .get_messages(peer, &[id])
            .await?
            .into_iter()
            .find(|m| m.id == id)
            .ok_or_else(not_found)
    }

    /// Download a whole file in [`CHUNK_SIZE`] pieces, failing past
    /// [`MAX_FILE_SIZE`].
    pub async fn download_file(&self, location: &FileLocation) -> Result<Vec<u8>, TelegramError> {
        let api = self.api()?;
        let mut data = Vec::new();
        let mut offset: i64 = 0;

        loop {
            let chunk = api
                .get_file_chunk(location, offset, CHUNK_SIZE as i32)
                .await?;
            if data.len() + chunk.len() > MAX_FILE_SIZE {
                return Err(TelegramError::FileTooLarge {
                    limit: MAX_FILE_SIZE,
                });
            }
            let last = chunk.len() < CHUNK_SIZE;
            data.extend_from_slice(&chunk);
            if last {
                break;
            }
            offset += CHUNK_SIZE as i64;
        }

        Ok(data)
    }

    pub fn bare_channel_id(&self, chat_id: i64) -> Result<i64, TelegramError> {
        Ok(self.api()?.bare_channel_id(chat_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::api::unmark_channel_id;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeApi {
        resolves: AtomicUsize,
        file_size: usize,
        offsets: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl TelegramApi for FakeApi {
        async fn resolve_username(&self, username: &str) -> Result<ChannelPeer, TelegramError> {
            self.resolves.fetch_add(1, Ordering::SeqCst);
            match username {
                "busy" => Err(TelegramError::FloodWait { seconds: 12 }),
                "missing" => Err(TelegramError::Rpc("USERNAME_NOT_OCCUPIED".into())),
                _ => Ok(ChannelPeer {
                    channel_id: 77,
                    access_hash: 88,
                    title: "News".into(),
                    username: Some(username.into()),
                }),
            }
        }

        async fn get_history(
            &self,
            _peer: &ChannelPeer,
            _limit: i32,
            _offset_id: i32,
        ) -> Result<Vec<RawMessage>, TelegramError> {
            Ok(Vec::new())
        }

        async fn get_messages(
            &self,
            _peer: &ChannelPeer,
            _ids: &[i32],
        ) -> Result<Vec<RawMessage>, TelegramError> {
            Ok(Vec::new())
        }

        async fn get_file_chunk(
            &self,
            _location: &FileLocation,
            offset: i64,
            limit: i32,
        ) -> Result<Vec<u8>, TelegramError> {
            self.offsets.lock().unwrap().push(offset);
            let remaining = self.file_size.saturating_sub(offset as usize);
            Ok(vec![1u8; remaining.min(limit as usize)])
        }

        fn bare_channel_id(&self, chat_id: i64) -> i64 {
            unmark_channel_id(chat_id)
        }
    }

    struct FakeConnector {
        api: Arc<FakeApi>,
        delay: Duration,
    }

    #[async_trait]
    impl TelegramConnector for FakeConnector {
        async fn connect(&self, _session: Vec<u8>) -> Result<Arc<dyn TelegramApi>, TelegramError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.api.clone())
        }
    }

    fn client_with(api: Arc<FakeApi>, delay: Duration) -> (TelegramClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("s.session"));
        store.save(b"session").unwrap();
        let client = TelegramClient::new(Arc::new(FakeConnector { api, delay }), store);
        (client, dir)
    }

    fn location() -> FileLocation {
        FileLocation::Document {
            id: 1,
            access_hash: 2,
            file_reference: Vec::new(),
            thumb_kind: String::new(),
        }
    }

    #[tokio::test]
    async fn test_missing_session_refuses_connect() {
        let dir = tempfile::tempdir().unwrap();
        let client = TelegramClient::new(
            Arc::new(FakeConnector {
                api: Arc::default(),
                delay: Duration::ZERO,
            }),
            SessionStore::new(dir.path().join("absent.session")),
        );
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TelegramError::Session(_)));
        assert!(!client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_deadline() {
        let (client, _dir) = client_with(Arc::default(), Duration::from_secs(30));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, TelegramError::ConnectDeadline(_)));
    }

    #[tokio::test]
    async fn test_calls_require_connection() {
        let (client, _dir) = client_with(Arc::default(), Duration::ZERO);
        assert!(matches!(
            client.resolve_channel("news").await,
            Err(TelegramError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_resolve_is_cached() {
        let api = Arc::new(FakeApi::default());
        let (client, _dir) = client_with(api.clone(), Duration::ZERO);
        client.connect().await.unwrap();

        let peer = client.resolve_channel("@News").await.unwrap();
        let again = client.resolve_channel("news").await.unwrap();
        assert_eq!(peer, again);
        assert_eq!(api.resolves.load(Ordering::SeqCst), 1);

        let by_id = client.peer_for_chat(-1_000_000_000_077).await.unwrap();
        assert_eq!(by_id.access_hash, 88);
    }

    #[tokio::test]
    async fn test_resolve_errors() {
        let (client, _dir) = client_with(Arc::default(), Duration::ZERO);
        client.connect().await.unwrap();

        assert!(matches!(
            client.resolve_channel("busy").await,
            Err(TelegramError::FloodWait { seconds: 12 })
        ));
        match client.resolve_channel("@missing").await {
            Err(TelegramError::ChannelUnavailable { username, reason }) => {
                assert_eq!(username, "missing");
                assert!(reason.contains("USERNAME_NOT_OCCUPIED"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_chunked_download() {
        let api = Arc::new(FakeApi {
            file_size: CHUNK_SIZE * 2 + 10,
            ..Default::default()
        });
        let (client, _dir) = client_with(api.clone(), Duration::ZERO);
        client.connect().await.unwrap();

        let data = client.download_file(&location()).await.unwrap();
        assert_eq!(data.len(), CHUNK_SIZE * 2 + 10);
        assert_eq!(
            *api.offsets.lock().unwrap(),
            vec![0, CHUNK_SIZE as i64, 2 * CHUNK_SIZE as i64]
        );
    }

    #[tokio::test]
    async fn test_download_size_cap() {
        let api = Arc::new(FakeApi {
            file_size: MAX_FILE_SIZE + 1,
            ..Default::default()
        });
        let (client, _dir) = client_with(api, Duration::ZERO);
        client.connect().await.unwrap();

        assert!(matches!(
            client.download_file(&location()).await,
            Err(TelegramError::FileTooLarge { .. })
        ));
    }
}
