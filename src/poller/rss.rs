use async_trait::async_trait;
use std::time::Duration;

use super::{item_cap, url_fingerprint, Harvest, Ingest, PollError, SourcePoller};
use crate::config::RssConfig;
use crate::content::ContentEnricher;
use crate::feed::{parse_feed, FeedItem};
use crate::http::Fetcher;
use crate::media::media_kind_for_url;
use crate::storage::{MediaObject, NewPost, Source, StorageError};

/// SYNDICATION family: fetch the feed, optionally enrich thin items, ingest.
pub struct RssPoller {
    config: RssConfig,
    fetcher: Fetcher,
    enricher: Option<ContentEnricher>,
    ingest: Ingest,
}

impl RssPoller {
    pub fn new(config: RssConfig, fetcher: Fetcher, ingest: Ingest) -> Self {
        let enricher = config
            .fetch_full_content
            .then(|| ContentEnricher::new(fetcher.clone(), config.min_content_length));
        Self {
            config,
            fetcher,
            enricher,
            ingest,
        }
    }

    async fn fetch_items(&self, url: &str) -> Result<Vec<FeedItem>, PollError> {
        let response = self.fetcher.get(url).await?;
        if !response.is_ok() {
            return Err(PollError::HttpStatus(response.status));
        }
        Ok(parse_feed(&response.body)?.items)
    }
}

#[async_trait]
impl SourcePoller for RssPoller {
    fn family(&self) -> &'static str {
        "syndication"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.polling_interval_seconds.max(1))
    }

    fn concurrency(&self) -> usize {
        self.config.concurrent_feeds
    }

    fn source_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.feed_timeout.max(1)))
    }

    fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    async fn due_sources(&self) -> Result<Vec<Source>, StorageError> {
        self.ingest.repo().due_syndication(&self.config.tiers).await
    }

    async fn fetch(&self, source: &Source) -> Result<Harvest, PollError> {
        let url = source
            .feed_url
            .as_deref()
            .ok_or(PollError::MissingEndpoint("feed URL"))?;

        let cap = item_cap(
            source,
            self.config.initial_articles_count,
            self.config.max_articles_per_request,
        );
        let mut items: Vec<FeedItem> = self.fetch_items(url).await?;
        items.truncate(cap);

        if let Some(enricher) = &self.enricher {
            for item in &mut items {
                enricher.enrich(item).await;
            }
        }

        let posts: Vec<NewPost> = items
            .into_iter()
            .filter_map(|item| item_to_post(source, item))
            .collect();

        Ok(Harvest {
            posts,
            cursor: None,
        })
    }

    async fn record_success(
        &self,
        source: &Source,
        _cursor: Option<i64>,
        created: usize,
    ) -> Result<(), StorageError> {
        self.ingest
            .repo()
            .update_poll_success(source.id, created)
            .await
    }

    async fn record_failure(&self, source: &Source, error: &PollError) {
        if let Err(e) = self
            .ingest
            .repo()
            .update_poll_error(source.id, &error.to_string())
            .await
        {
            tracing::warn!(source_id = %source.id, error = %e, "Failed to record poll error");
        }
    }
}

/// Items without a link cannot be fingerprinted and are dropped.
fn item_to_post(source: &Source, item: FeedItem) -> Option<NewPost> {
    let link = item.link.as_deref()?.trim().to_owned();
    if link.is_empty() {
        return None;
    }

    let mut media_urls: Vec<String> = Vec::new();
    for url in item.enclosure_url.iter().chain(item.images.iter()) {
        if !media_urls.contains(url) {
            media_urls.push(url.clone());
        }
    }

    let content = item.body().trim().to_owned();
    let title = Some(item.title.trim().to_owned()).filter(|t| !t.is_empty());
    Some(NewPost {
        raw_feed_id: source.id,
        unique_code: url_fingerprint(&link),
        content,
        title,
        media: media_urls
            .into_iter()
            .map(|u| MediaObject::new(media_kind_for_url(&u), u))
            .collect(),
        source_url: Some(link),
        published_at: item.published_at,
        telegram_message_id: None,
        media_group_id: None,
        moderation: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MediaKind, SourceType};

    #[test]
    fn test_item_to_post() {
        let source = Source::new(SourceType::Syndication);
        let item = FeedItem {
            title: " Hello ".into(),
            link: Some("https://example.com/a".into()),
            description: Some("desc".into()),
            enclosure_url: Some("https://example.com/a.jpg".into()),
            images: vec![
                "https://example.com/a.jpg".into(),
                "https://example.com/clip.mp4".into(),
            ],
            ..Default::default()
        };
        let post = item_to_post(&source, item).unwrap();
        assert_eq!(post.unique_code, url_fingerprint("https://example.com/a"));
        assert_eq!(post.title.as_deref(), Some("Hello"));
        assert_eq!(post.content, "desc");
        assert_eq!(post.media.len(), 2);
        assert_eq!(post.media[1].kind, MediaKind::Video);
    }

    #[test]
    fn test_item_without_link_is_dropped() {
        let source = Source::new(SourceType::Syndication);
        assert!(item_to_post(&source, FeedItem::default()).is_none());
    }
}
