//! Ordered discovery pipeline: turns a bare site URL into article candidates.
//!
//! Steps run in order and the first one returning a non-empty list wins; its
//! name is reported as the discovery's `source_type`:
//!
//! 1. `FEED` - the URL itself is a feed (by suffix or body sniffing)
//! 2. `WELL_KNOWN` - common feed endpoints relative to the site root
//! 3. `SITEMAP` - dated or article-like URLs from the sitemap
//! 4. `HTML` - article links harvested from the page
//! 5. `READABILITY` - same-host pages run through the readability extractor
//!
//! A step that fails (network, parse) yields zero candidates and the pipeline
//! moves on.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{Html, Selector};
use std::collections::HashSet;
use std::sync::LazyLock;
use thiserror::Error;
use tokio::sync::OnceCell;
use url::Url;

use super::parser::{parse_feed, FeedItem};
use super::sitemap::{parse_sitemap, select_article_urls};
use crate::content::readability;
use crate::http::{FetchError, FetchResponse, Fetcher};
use crate::util::{collapse_whitespace, has_media_extension, resolve_url, same_host};

const FEED_SUFFIXES: [&str; 8] = [
    ".xml", ".rss", "/rss", "/feed", "/atom", "/rss.xml", "/feed.xml", "/atom.xml",
];

const FEED_MARKERS: [&str; 4] = ["<rss", "<feed", "<channel>", "http://www.w3.org/2005/atom"];

/// Bytes of the body inspected when sniffing for a feed.
const SNIFF_LEN: usize = 500;

const WELL_KNOWN_PATHS: [&str; 18] = [
    "/feed",
    "/rss",
    "/rss.xml",
    "/atom.xml",
    "/feed.xml",
    "/feed/",
    "/index.xml",
    "/feed.json",
    "/blog/feed",
    "/blog/rss",
    "/blog/rss.xml",
    "/blog/atom.xml",
    "/blog/feed.xml",
    "/news/rss",
    "/news/feed",
    "/news/rss.xml",
    "/feeds/posts/default",
    "/posts/index.xml",
];

const SITEMAP_PATHS: [&str; 3] = ["/sitemap.xml", "/sitemap_index.xml", "/sitemap-index.xml"];

/// Child sitemaps followed from a sitemap index.
const MAX_CHILD_SITEMAPS: usize = 3;

/// Anchors inside article-like scopes.
const LINK_SELECTORS: [&str; 10] = [
    "article a[href]",
    ".post a[href]",
    ".entry a[href]",
    ".post-title a[href]",
    ".entry-title a[href]",
    ".article a[href]",
    ".blog-post a[href]",
    ".news-item a[href]",
    "h2 a[href]",
    "h3 a[href]",
];

const MAX_HARVESTED_LINKS: usize = 50;

/// Pages fetched by the readability step.
const MAX_READABILITY_PAGES: usize = 10;

/// Dated (`/2024/`) or blog/post/article path segments.
static ARTICLE_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(20\d{2}|blog|blogs|post|posts|article|articles|news|story|stories)/[^/?#]+")
        .expect("valid regex")
});

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("no articles discovered")]
    NothingFound,
}

/// One discovered article.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArticleCandidate {
    pub url: String,
    pub title: Option<String>,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub image_url: Option<String>,
    /// All media URLs known for the article, lead image first
    pub media_urls: Vec<String>,
}

impl ArticleCandidate {
    fn from_url(url: String) -> Self {
        Self {
            url,
            ..Default::default()
        }
    }

    fn from_feed_item(item: FeedItem) -> Option<Self> {
        let url = item.link.clone()?;
        let body = item.body().to_owned();
        let image_url = item
            .enclosure_url
            .clone()
            .or_else(|| item.images.first().cloned());
        let mut media_urls = Vec::new();
        if let Some(img) = &image_url {
            media_urls.push(img.clone());
        }
        for img in item.images {
            if !media_urls.contains(&img) {
                media_urls.push(img);
            }
        }
        Some(Self {
            url,
            title: Some(item.title),
            content: (!body.is_empty()).then_some(body),
            published_at: item.published_at,
            image_url,
            media_urls,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResult {
    /// Name of the step that produced the articles
    pub source_type: String,
    pub articles: Vec<ArticleCandidate>,
}

/// Shared state of one pipeline run; the base page is fetched at most once.
pub struct DiscoveryContext<'a> {
    fetcher: &'a Fetcher,
    base: Url,
    base_page: OnceCell<Option<FetchResponse>>,
}

impl DiscoveryContext<'_> {
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Body of the base URL when it answered 200.
    async fn base_page(&self) -> Option<&FetchResponse> {
        self.base_page
            .get_or_init(|| async {
                match self.fetcher.get(self.base.as_str()).await {
                    Ok(resp) if resp.is_ok() => Some(resp),
                    Ok(resp) => {
                        tracing::debug!(url = %self.base, status = resp.status, "Base page not available");
                        None
                    }
                    Err(e) => {
                        tracing::debug!(url = %self.base, error = %e, "Base page fetch failed");
                        None
                    }
                }
            })
            .await
            .as_ref()
    }

    /// GET returning the body only for a 200.
    async fn get_ok(&self, url: &str) -> Option<FetchResponse> {
        match self.fetcher.get(url).await {
            Ok(resp) if resp.is_ok() => Some(resp),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "Discovery fetch failed");
                None
            }
        }
    }
}

/// A named discovery strategy.
#[async_trait]
pub trait DiscoveryStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &DiscoveryContext<'_>, max_articles: usize)
        -> Vec<ArticleCandidate>;
}

// ============================================================================
// Steps
// ============================================================================

pub struct FeedStep;

#[async_trait]
impl DiscoveryStep for FeedStep {
    fn name(&self) -> &'static str {
        "FEED"
    }

    async fn execute(&self, ctx: &DiscoveryContext<'_>, max: usize) -> Vec<ArticleCandidate> {
        let path = ctx.base().path().to_ascii_lowercase();
        let by_suffix = FEED_SUFFIXES.iter().any(|s| path.ends_with(s));

        let Some(page) = ctx.base_page().await else {
            return Vec::new();
        };
        if !by_suffix && !looks_like_feed(&page.body) {
            return Vec::new();
        }
        feed_candidates(&page.body, max)
    }
}

pub struct WellKnownStep;

#[async_trait]
impl DiscoveryStep for WellKnownStep {
    fn name(&self) -> &'static str {
        "WELL_KNOWN"
    }

    async fn execute(&self, ctx: &DiscoveryContext<'_>, max: usize) -> Vec<ArticleCandidate> {
        for path in WELL_KNOWN_PATHS {
            let Ok(url) = ctx.base().join(path) else {
                continue;
            };
            let Some(resp) = ctx.get_ok(url.as_str()).await else {
                continue;
            };
            let candidates = feed_candidates(&resp.body, max);
            if !candidates.is_empty() {
                tracing::debug!(url = %url, count = candidates.len(), "Found well-known feed");
                return candidates;
            }
        }
        Vec::new()
    }
}

pub struct SitemapStep;

#[async_trait]
impl DiscoveryStep for SitemapStep {
    fn name(&self) -> &'static str {
        "SITEMAP"
    }

    async fn execute(&self, ctx: &DiscoveryContext<'_>, max: usize) -> Vec<ArticleCandidate> {
        for path in SITEMAP_PATHS {
            let Ok(url) = ctx.base().join(path) else {
                continue;
            };
            let Some(resp) = ctx.get_ok(url.as_str()).await else {
                continue;
            };

            let sitemap = parse_sitemap(&resp.body);
            let locs = if sitemap.is_index {
                let mut locs = Vec::new();
                for child in sitemap.locs.iter().take(MAX_CHILD_SITEMAPS) {
                    if let Some(child_resp) = ctx.get_ok(child).await {
                        locs.extend(parse_sitemap(&child_resp.body).locs);
                    }
                }
                locs
            } else {
                sitemap.locs
            };

            let selected: Vec<ArticleCandidate> = select_article_urls(&locs)
                .into_iter()
                .take(max)
                .map(ArticleCandidate::from_url)
                .collect();
            if !selected.is_empty() {
                return selected;
            }
        }
        Vec::new()
    }
}

pub struct HtmlLinkStep;

#[async_trait]
impl DiscoveryStep for HtmlLinkStep {
    fn name(&self) -> &'static str {
        "HTML"
    }

    async fn execute(&self, ctx: &DiscoveryContext<'_>, max: usize) -> Vec<ArticleCandidate> {
        let Some(page) = ctx.base_page().await else {
            return Vec::new();
        };
        harvest_links(&page.text(), ctx.base())
            .into_iter()
            .take(max.min(MAX_HARVESTED_LINKS))
            .map(|(url, title)| ArticleCandidate {
                title,
                ..ArticleCandidate::from_url(url)
            })
            .collect()
    }
}

pub struct ReadabilityStep;

#[async_trait]
impl DiscoveryStep for ReadabilityStep {
    fn name(&self) -> &'static str {
        "READABILITY"
    }

    async fn execute(&self, ctx: &DiscoveryContext<'_>, max: usize) -> Vec<ArticleCandidate> {
        let Some(page) = ctx.base_page().await else {
            return Vec::new();
        };
        let links = same_host_links(&page.text(), ctx.base(), MAX_READABILITY_PAGES);

        let mut articles = Vec::new();
        for link in links {
            if articles.len() >= max {
                break;
            }
            let Some(resp) = ctx.get_ok(&link).await else {
                continue;
            };
            let Ok(page_url) = Url::parse(&link) else {
                continue;
            };
            let Some(readable) = readability::extract(&resp.text(), &page_url) else {
                continue;
            };
            let Some(title) = readable.title.filter(|t| !t.is_empty()) else {
                continue;
            };
            articles.push(ArticleCandidate {
                url: link,
                title: Some(title),
                content: Some(readable.text),
                published_at: None,
                media_urls: readable.lead_image.iter().cloned().collect(),
                image_url: readable.lead_image,
            });
        }
        articles
    }
}

// ============================================================================
// Pipeline
// ============================================================================

/// Runs discovery steps in order until one yields candidates.
pub struct DiscoveryPipeline {
    fetcher: Fetcher,
    steps: Vec<Box<dyn DiscoveryStep>>,
}

impl DiscoveryPipeline {
    /// The standard five-step pipeline.
    pub fn new(fetcher: Fetcher) -> Self {
        Self::with_steps(
            fetcher,
            vec![
                Box::new(FeedStep),
                Box::new(WellKnownStep),
                Box::new(SitemapStep),
                Box::new(HtmlLinkStep),
                Box::new(ReadabilityStep),
            ],
        )
    }

    pub fn with_steps(fetcher: Fetcher, steps: Vec<Box<dyn DiscoveryStep>>) -> Self {
        Self { fetcher, steps }
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Discover up to `max_articles` from `base_url`.
    ///
    /// With `known_type` naming a step, only that step runs; an unknown name
    /// runs the full pipeline.
    pub async fn discover(
        &self,
        base_url: &str,
        max_articles: usize,
        known_type: Option<&str>,
    ) -> Result<DiscoveryResult, DiscoveryError> {
        let base = Url::parse(base_url).map_err(|e| DiscoveryError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(DiscoveryError::InvalidUrl(format!(
                "unsupported scheme: {}",
                base.scheme()
            )));
        }

        let ctx = DiscoveryContext {
            fetcher: &self.fetcher,
            base,
            base_page: OnceCell::new(),
        };

        let known = known_type.and_then(|t| {
            self.steps
                .iter()
                .find(|s| s.name().eq_ignore_ascii_case(t.trim()))
        });

        let steps: Vec<&dyn DiscoveryStep> = match known {
            Some(step) => vec![step.as_ref()],
            None => self.steps.iter().map(|s| s.as_ref()).collect(),
        };

        for step in steps {
            let mut articles = step.execute(&ctx, max_articles).await;
            if articles.is_empty() {
                tracing::debug!(url = %base_url, step = step.name(), "Discovery step found nothing");
                continue;
            }
            articles.truncate(max_articles);
            tracing::debug!(
                url = %base_url,
                step = step.name(),
                count = articles.len(),
                "Discovery step succeeded"
            );
            return Ok(DiscoveryResult {
                source_type: step.name().to_string(),
                articles,
            });
        }

        Err(DiscoveryError::NothingFound)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn looks_like_feed(body: &[u8]) -> bool {
    let head = &body[..body.len().min(SNIFF_LEN)];
    let head = String::from_utf8_lossy(head).to_lowercase();
    FEED_MARKERS.iter().any(|m| head.contains(m))
}

fn feed_candidates(body: &[u8], max: usize) -> Vec<ArticleCandidate> {
    match parse_feed(body) {
        Ok(feed) => feed
            .items
            .into_iter()
            .filter_map(ArticleCandidate::from_feed_item)
            .take(max)
            .collect(),
        Err(e) => {
            tracing::debug!(error = %e, "Body is not a parseable feed");
            Vec::new()
        }
    }
}

/// Candidate article URL: same host as `base`, not the base page itself,
/// not a media file.
fn accept_link(href: &str, base: &Url) -> Option<Url> {
    let mut url = resolve_url(href, base)?;
    url.set_fragment(None);
    if !same_host(&url, base) || has_media_extension(&url) {
        return None;
    }
    if url.path().trim_end_matches('/') == base.path().trim_end_matches('/') {
        return None;
    }
    Some(url)
}

/// Article links from scoped selectors and article-like paths, deduplicated,
/// with anchor text as title.
fn harvest_links(html: &str, base: &Url) -> Vec<(String, Option<String>)> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    let mut links = Vec::new();

    let mut consider = |href: &str, text: String| {
        if links.len() >= MAX_HARVESTED_LINKS {
            return;
        }
        if let Some(url) = accept_link(href, base) {
            let url = url.to_string();
            if seen.insert(url.clone()) {
                let title = collapse_whitespace(&text);
                links.push((url, (!title.is_empty()).then_some(title)));
            }
        }
    };

    for selector in LINK_SELECTORS.iter().filter_map(|s| Selector::parse(s).ok()) {
        for a in document.select(&selector) {
            if let Some(href) = a.value().attr("href") {
                consider(href, a.text().collect::<Vec<_>>().join(" "));
            }
        }
    }

    if let Ok(selector) = Selector::parse("a[href]") {
        for a in document.select(&selector) {
            let Some(href) = a.value().attr("href") else {
                continue;
            };
            let is_article_path = resolve_url(href, base)
                .map(|u| ARTICLE_PATH.is_match(u.path()))
                .unwrap_or(false);
            if is_article_path {
                consider(href, a.text().collect::<Vec<_>>().join(" "));
            }
        }
    }

    links
}

/// First `limit` distinct same-host, non-media links on the page.
fn same_host_links(html: &str, base: &Url, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    document
        .select(&selector)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| accept_link(href, base))
        .map(|u| u.to_string())
        .filter(|u| seen.insert(u.clone()))
        .take(limit)
        .collect()
}
