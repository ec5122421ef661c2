use url::Url;

use super::readability;
use crate::feed::FeedItem;
use crate::http::Fetcher;

/// Default minimum body length, in characters, below which an item is enriched.
pub const DEFAULT_MIN_CONTENT_LENGTH: usize = 500;

/// Replaces thin feed bodies with the readable text of the linked page.
#[derive(Clone)]
pub struct ContentEnricher {
    fetcher: Fetcher,
    min_length: usize,
}

impl ContentEnricher {
    pub fn new(fetcher: Fetcher, min_length: usize) -> Self {
        Self {
            fetcher,
            min_length,
        }
    }

    /// Enrich `item` in place. Returns true when the body was replaced.
    ///
    /// Failures are logged and leave the item untouched.
    pub async fn enrich(&self, item: &mut FeedItem) -> bool {
        if item.body().chars().count() >= self.min_length {
            return false;
        }
        let Some(link) = item.link.clone() else {
            return false;
        };
        let Ok(page_url) = Url::parse(&link) else {
            return false;
        };

        let response = match self.fetcher.get(&link).await {
            Ok(resp) if resp.is_ok() => resp,
            Ok(resp) => {
                tracing::debug!(url = %link, status = resp.status, "Enrichment fetch returned non-200");
                return false;
            }
            Err(e) => {
                tracing::debug!(url = %link, error = %e, "Enrichment fetch failed");
                return false;
            }
        };

        let Some(readable) = readability::extract(&response.text(), &page_url) else {
            return false;
        };

        if item.enclosure_url.is_none() {
            item.enclosure_url = readable.lead_image.clone();
        }

        if readable.text_len() >= self.min_length {
            item.content = Some(readable.text);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetcherConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn enricher(min: usize) -> ContentEnricher {
        ContentEnricher::new(Fetcher::new(FetcherConfig::unthrottled()).unwrap(), min)
    }

    fn item(link: String, content: &str) -> FeedItem {
        FeedItem {
            title: "t".into(),
            link: Some(link),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_thin_item_is_enriched() {
        let server = MockServer::start().await;
        let body = "word ".repeat(40);
        Mock::given(method("GET"))
            .and(path("/post"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                r#"<html><head><meta property="og:image" content="/lead.png"></head>
                <body><article><p>{body}</p></article></body></html>"#
            )))
            .mount(&server)
            .await;

        let mut it = item(format!("{}/post", server.uri()), "short");
        assert!(enricher(100).enrich(&mut it).await);
        assert!(it.content.as_deref().unwrap().starts_with("word word"));
        assert_eq!(
            it.enclosure_url.as_deref(),
            Some(format!("{}/lead.png", server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_long_item_untouched() {
        let mut it = item("http://127.0.0.1:9/never".into(), &"x".repeat(600));
        assert!(!enricher(500).enrich(&mut it).await);
        assert_eq!(it.content.as_deref().map(str::len), Some(600));
    }

    #[tokio::test]
    async fn test_extraction_below_floor_keeps_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("<html><body><article><p>tiny</p></article></body></html>"),
            )
            .mount(&server)
            .await;

        let mut it = item(format!("{}/post", server.uri()), "short");
        assert!(!enricher(100).enrich(&mut it).await);
        assert_eq!(it.content.as_deref(), Some("short"));
    }

    #[tokio::test]
    async fn test_fetch_failure_is_non_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut it = item(format!("{}/gone", server.uri()), "short");
        assert!(!enricher(100).enrich(&mut it).await);
        assert_eq!(it.content.as_deref(), Some("short"));
    }
}
