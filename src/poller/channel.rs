use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{channel_fingerprint, item_cap, Harvest, Ingest, PollError, SourcePoller};
use crate::config::TelegramConfig;
use crate::storage::{ChannelPollUpdate, NewPost, Source, StorageError};
use crate::telegram::{
    ChannelPeer, MessageParser, NormalizedMessage, RateController, RawMessage, TelegramClient,
};

/// Upper bound on the members of one media album.
const MAX_ALBUM_SIZE: usize = 10;

/// CHANNEL family: read new history past the stored cursor, merge albums,
/// ingest. Pacing adapts to flood-wait feedback.
pub struct ChannelPoller {
    config: TelegramConfig,
    client: Arc<TelegramClient>,
    rate: Arc<RateController>,
    parser: MessageParser,
    ingest: Ingest,
}

impl ChannelPoller {
    pub fn new(config: TelegramConfig, client: Arc<TelegramClient>, ingest: Ingest) -> Self {
        let rate = Arc::new(RateController::new(
            Duration::from_millis(config.base_delay_ms),
            config.max_multiplier,
        ));
        let parser = MessageParser::new(config.media_base_url.clone());
        Self {
            config,
            client,
            rate,
            parser,
            ingest,
        }
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    async fn peer_for(&self, source: &Source) -> Result<ChannelPeer, PollError> {
        if let Some(username) = source
            .telegram_username
            .as_deref()
            .filter(|u| !u.trim().trim_start_matches('@').is_empty())
        {
            return Ok(self.client.resolve_channel(username).await?);
        }
        let chat_id = source
            .telegram_channel_id
            .ok_or(PollError::MissingEndpoint("channel username or ID"))?;
        Ok(self.client.peer_for_chat(chat_id).await?)
    }

    /// Messages after `cursor`, newest `cap` first, plus any older members of
    /// an album cut by the page edge. Otherwise those members would fall
    /// below the advanced cursor and never be read.
    async fn history_after(
        &self,
        peer: &ChannelPeer,
        cap: usize,
        cursor: i32,
    ) -> Result<Vec<RawMessage>, PollError> {
        let mut raw: Vec<RawMessage> = self
            .client
            .get_history(peer, cap, 0)
            .await?
            .into_iter()
            .filter(|m| m.id > cursor)
            .collect();

        let edge = raw
            .iter()
            .min_by_key(|m| m.id)
            .and_then(|m| m.grouped_id.map(|group| (m.id, group)));
        if let Some((oldest, group)) = edge.filter(|_| raw.len() >= cap) {
            let older = self
                .client
                .get_history(peer, MAX_ALBUM_SIZE, oldest)
                .await?;
            raw.extend(
                older
                    .into_iter()
                    .filter(|m| m.id > cursor && m.grouped_id == Some(group)),
            );
        }
        Ok(raw)
    }
}

#[async_trait]
impl SourcePoller for ChannelPoller {
    fn family(&self) -> &'static str {
        "channel"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.polling_interval_seconds.max(1))
    }

    fn concurrency(&self) -> usize {
        self.config.concurrent_channels
    }

    fn source_timeout(&self) -> Option<Duration> {
        None
    }

    fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    async fn due_sources(&self) -> Result<Vec<Source>, StorageError> {
        self.ingest
            .repo()
            .due_channels(
                &self.config.tiers,
                Duration::from_secs(self.config.flood_cooldown_seconds),
            )
            .await
    }

    async fn fetch(&self, source: &Source) -> Result<Harvest, PollError> {
        if self.config.adaptive_rate_enabled {
            let delay = self.rate.current_delay();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        let peer = self.peer_for(source).await?;
        let cap = item_cap(source, self.config.initial_messages, self.config.max_messages);
        let cursor = source.last_message_cursor();

        let raw = self.history_after(&peer, cap, cursor).await?;
        let newest = raw.iter().map(|m| i64::from(m.id)).max();

        let posts: Vec<NewPost> = self
            .parser
            .normalize_all(&raw, peer.channel_id)
            .into_iter()
            .map(|m| message_to_post(source, &peer, m))
            .collect();

        tracing::debug!(
            source_id = %source.id,
            channel = peer.channel_id,
            fetched = raw.len(),
            "Channel history read"
        );
        Ok(Harvest {
            posts,
            cursor: newest,
        })
    }

    async fn record_success(
        &self,
        source: &Source,
        cursor: Option<i64>,
        _created: usize,
    ) -> Result<(), StorageError> {
        self.ingest
            .repo()
            .update_channel_poll(source.id, ChannelPollUpdate::success(cursor))
            .await?;
        self.rate.on_success();
        Ok(())
    }

    async fn record_failure(&self, source: &Source, error: &PollError) {
        let is_flood = match error.flood_wait_seconds() {
            Some(seconds) => {
                self.rate.on_flood_wait(seconds);
                metrics::counter!("harvester_flood_waits_total").increment(1);
                tracing::warn!(
                    source_id = %source.id,
                    seconds,
                    multiplier = self.rate.multiplier(),
                    "Flood wait, source cooling down"
                );
                true
            }
            None => false,
        };

        if let Err(e) = self
            .ingest
            .repo()
            .update_channel_poll(
                source.id,
                ChannelPollUpdate::failure(error.to_string(), is_flood),
            )
            .await
        {
            tracing::warn!(source_id = %source.id, error = %e, "Failed to record poll error");
        }
    }
}

fn message_to_post(source: &Source, peer: &ChannelPeer, message: NormalizedMessage) -> NewPost {
    NewPost {
        raw_feed_id: source.id,
        unique_code: channel_fingerprint(
            message.channel_id,
            message.media_group_id,
            message.message_id,
        ),
        source_url: Some(message_link(peer, message.message_id)),
        title: Some(message.title),
        content: message.content,
        media: message.media,
        published_at: Some(message.published_at),
        telegram_message_id: Some(message.message_id),
        media_group_id: message.media_group_id,
        moderation: None,
    }
}

/// Public link to a message: `t.me/<username>/<id>`, or the private
/// `t.me/c/<channel>/<id>` form for channels without a username.
fn message_link(peer: &ChannelPeer, message_id: i64) -> String {
    match peer
        .username
        .as_deref()
        .map(|u| u.trim_start_matches('@'))
        .filter(|u| !u.is_empty())
    {
        Some(username) => format!("https://t.me/{username}/{message_id}"),
        None => format!("https://t.me/c/{}/{message_id}", peer.channel_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SourceType;
    use chrono::Utc;

    fn peer(username: Option<&str>) -> ChannelPeer {
        ChannelPeer {
            channel_id: 1_234,
            access_hash: 99,
            title: "News".into(),
            username: username.map(str::to_owned),
        }
    }

    #[test]
    fn test_message_link() {
        assert_eq!(message_link(&peer(Some("@news")), 7), "https://t.me/news/7");
        assert_eq!(message_link(&peer(None), 7), "https://t.me/c/1234/7");
    }

    #[test]
    fn test_album_post_uses_group_code() {
        let source = Source::new(SourceType::Channel);
        let message = NormalizedMessage {
            message_id: 10,
            channel_id: 1_234,
            title: "caption".into(),
            content: "caption".into(),
            media: Vec::new(),
            published_at: Utc::now(),
            media_group_id: Some(555),
        };
        let post = message_to_post(&source, &peer(Some("news")), message);
        assert_eq!(post.unique_code, "tg_1234_555");
        assert_eq!(post.telegram_message_id, Some(10));
        assert_eq!(post.media_group_id, Some(555));
        assert_eq!(post.source_url.as_deref(), Some("https://t.me/news/10"));
    }
}
