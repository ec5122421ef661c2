use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{item_cap, url_fingerprint, Harvest, Ingest, PollError, SourcePoller};
use crate::config::WebConfig;
use crate::content::readability;
use crate::feed::{ArticleCandidate, DiscoveryPipeline};
use crate::http::{Fetcher, RobotsPolicy};
use crate::media::{media_kind_for_url, MediaExtractor};
use crate::storage::{MediaObject, NewPost, Source, StorageError};

/// WEB family: run discovery on the site, optionally visit each article for
/// its media, ingest.
pub struct WebPoller {
    config: WebConfig,
    fetcher: Fetcher,
    discovery: Arc<DiscoveryPipeline>,
    extractor: MediaExtractor,
    robots: Option<RobotsPolicy>,
    ingest: Ingest,
}

impl WebPoller {
    pub fn new(
        config: WebConfig,
        fetcher: Fetcher,
        discovery: Arc<DiscoveryPipeline>,
        ingest: Ingest,
    ) -> Self {
        Self {
            config,
            fetcher,
            discovery,
            extractor: MediaExtractor::default(),
            robots: None,
            ingest,
        }
    }

    /// Skip article URLs disallowed by the site's robots.txt.
    pub fn with_robots(mut self, robots: RobotsPolicy) -> Self {
        self.robots = Some(robots);
        self
    }

    /// Fetch the article page; replace its media with what the extractor
    /// finds there and fill a missing body from the readable text.
    async fn visit_article(&self, article: &mut ArticleCandidate) {
        let Ok(page_url) = Url::parse(&article.url) else {
            return;
        };
        let html = match self.fetcher.get(&article.url).await {
            Ok(resp) if resp.is_ok() => resp.text(),
            Ok(resp) => {
                tracing::debug!(url = %article.url, status = resp.status, "Article page not available");
                return;
            }
            Err(e) => {
                tracing::debug!(url = %article.url, error = %e, "Article fetch failed");
                return;
            }
        };

        let media = self.extractor.extract_urls(&html, &page_url);
        if !media.is_empty() {
            article.image_url = media.first().cloned();
            article.media_urls = media;
        }

        if article.content.as_deref().is_none_or(|c| c.trim().is_empty()) {
            if let Some(readable) = readability::extract(&html, &page_url) {
                article.content = Some(readable.text);
                if article.title.is_none() {
                    article.title = readable.title;
                }
            }
        }
    }
}

#[async_trait]
impl SourcePoller for WebPoller {
    fn family(&self) -> &'static str {
        "web"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.polling_interval_seconds.max(1))
    }

    fn concurrency(&self) -> usize {
        self.config.concurrent_sources
    }

    fn source_timeout(&self) -> Option<Duration> {
        Some(Duration::from_secs(self.config.feed_timeout.max(1)))
    }

    fn ingest(&self) -> &Ingest {
        &self.ingest
    }

    async fn due_sources(&self) -> Result<Vec<Source>, StorageError> {
        self.ingest.repo().due_web(&self.config.tiers).await
    }

    async fn fetch(&self, source: &Source) -> Result<Harvest, PollError> {
        let site = source
            .site_url
            .as_deref()
            .or(source.feed_url.as_deref())
            .ok_or(PollError::MissingEndpoint("site URL"))?;

        let cap = item_cap(
            source,
            self.config.initial_articles_count,
            self.config.max_articles_per_request,
        );
        let result = self
            .discovery
            .discover(site, cap, source.discovery_method.as_deref())
            .await?;
        tracing::debug!(
            source_id = %source.id,
            method = %result.source_type,
            found = result.articles.len(),
            "Discovery finished"
        );

        let mut articles = result.articles;
        if let Some(robots) = &self.robots {
            let mut allowed = Vec::with_capacity(articles.len());
            for article in articles {
                if robots.is_allowed(&article.url).await {
                    allowed.push(article);
                } else {
                    tracing::debug!(url = %article.url, "Skipping article disallowed by robots.txt");
                }
            }
            articles = allowed;
        }

        if self.config.fetch_article_media {
            for article in &mut articles {
                self.visit_article(article).await;
            }
        }

        let posts: Vec<NewPost> = articles
            .into_iter()
            .map(|a| article_to_post(source, a))
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

fn article_to_post(source: &Source, article: ArticleCandidate) -> NewPost {
    let url = article.url.trim().to_owned();
    let title = article.title.filter(|t| !t.trim().is_empty());
    let content = article
        .content
        .filter(|c| !c.trim().is_empty())
        .or_else(|| title.clone())
        .unwrap_or_else(|| url.clone());

    let mut media_urls = article.media_urls;
    if let Some(image) = article.image_url {
        if !media_urls.contains(&image) {
            media_urls.insert(0, image);
        }
    }

    NewPost {
        raw_feed_id: source.id,
        unique_code: url_fingerprint(&url),
        content,
        title,
        media: media_urls
            .into_iter()
            .map(|u| MediaObject::new(media_kind_for_url(&u), u))
            .collect(),
        source_url: Some(url),
        published_at: article.published_at,
        telegram_message_id: None,
        media_group_id: None,
        moderation: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SourceType;

    #[test]
    fn test_article_to_post_fallbacks() {
        let source = Source::new(SourceType::Web);
        let post = article_to_post(
            &source,
            ArticleCandidate {
                url: "https://blog.example/2025/post-1".into(),
                title: Some("Post one".into()),
                image_url: Some("https://blog.example/lead.jpg".into()),
                ..Default::default()
            },
        );
        assert_eq!(post.content, "Post one");
        assert_eq!(post.unique_code, url_fingerprint("https://blog.example/2025/post-1"));
        assert_eq!(post.media.len(), 1);
        assert_eq!(post.media[0].url, "https://blog.example/lead.jpg");

        let bare = article_to_post(
            &source,
            ArticleCandidate {
                url: "https://blog.example/x".into(),
                ..Default::default()
            },
        );
        assert_eq!(bare.content, "https://blog.example/x");
        assert!(bare.title.is_none());
    }
}
