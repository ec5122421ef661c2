//! WEB discovery and the web engine against a mock site.

mod common;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use harvester::bus::subjects::POSTS_NEW_WEB;
use harvester::config::WebConfig;
use harvester::feed::DiscoveryPipeline;
use harvester::http::{Fetcher, FetcherConfig, RobotsPolicy};
use harvester::poller::{url_fingerprint, Engine, WebPoller};
use harvester::storage::{MediaKind, Source, SourceType};

fn fetcher() -> Fetcher {
    Fetcher::new(FetcherConfig::unthrottled()).unwrap()
}

fn sitemap(locs: &[String]) -> String {
    let urls: String = locs
        .iter()
        .map(|l| format!("<url><loc>{l}</loc></url>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{urls}</urlset>"#
    )
}

async fn mount(server: &MockServer, at: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sitemap_fallback_keeps_dated_urls() {
    let server = MockServer::start().await;
    mount(&server, "/feed", 404, "").await;
    mount(
        &server,
        "/sitemap.xml",
        200,
        &sitemap(&[
            "https://blog.example/2025/post-1".into(),
            "https://blog.example/about".into(),
        ]),
    )
    .await;

    let pipeline = DiscoveryPipeline::new(fetcher());
    let result = pipeline
        .discover(&format!("{}/", server.uri()), 10, None)
        .await
        .unwrap();

    assert_eq!(result.source_type, "SITEMAP");
    let urls: Vec<&str> = result.articles.iter().map(|a| a.url.as_str()).collect();
    assert_eq!(urls, vec!["https://blog.example/2025/post-1"]);
}

const ARTICLE: &str = r#"<html><head><title>Post One</title></head><body>
<header><img src="/img/site-logo.png"></header>
<article>
  <h1>Post One</h1>
  <p>The first paragraph of a reasonably long article body that should be picked up as readable text.</p>
  <p>A second paragraph continues the story with more words so the extractor has something to work on.</p>
  <img src="/img/lead-photo.jpg" alt="Lead">
</article>
</body></html>"#;

async fn web_site() -> MockServer {
    let server = MockServer::start().await;
    let post = format!("{}/2025/post-1", server.uri());
    let about = format!("{}/about", server.uri());
    mount(&server, "/sitemap.xml", 200, &sitemap(&[post, about])).await;
    mount(&server, "/2025/post-1", 200, ARTICLE).await;
    server
}

fn web_source(server: &MockServer) -> Source {
    let mut source = Source::new(SourceType::Web);
    source.site_url = Some(format!("{}/", server.uri()));
    source
}

#[tokio::test]
async fn test_web_engine_ingests_article_with_media() {
    let server = web_site().await;
    let h = common::harness();
    let source = web_source(&server);
    h.repo.insert_source(source.clone());

    let fetcher = fetcher();
    let engine = Engine::new(WebPoller::new(
        WebConfig::default(),
        fetcher.clone(),
        Arc::new(DiscoveryPipeline::new(fetcher)),
        h.ingest.clone(),
    ));
    let stats = engine.poll_cycle(&CancellationToken::new()).await;
    assert_eq!(stats.success, 1);
    assert_eq!(stats.total_posts, 1);

    let posts = h.repo.posts();
    let post = &posts[0].post;
    let url = format!("{}/2025/post-1", server.uri());
    assert_eq!(post.unique_code, url_fingerprint(&url));
    assert_eq!(post.source_url.as_deref(), Some(url.as_str()));
    assert!(post.content.contains("first paragraph"));
    assert!(post
        .media
        .iter()
        .any(|m| m.kind == MediaKind::Photo && m.url.ends_with("/img/lead-photo.jpg")));
    assert!(!post.media.iter().any(|m| m.url.contains("logo")));

    assert_eq!(h.publisher.events_for_subject(POSTS_NEW_WEB).len(), 1);
    let stored = h.repo.source(source.id).unwrap();
    assert!(stored.last_polled_at.is_some());
    assert_eq!(stored.error_count, 0);
}

#[tokio::test]
async fn test_robots_disallow_skips_articles() {
    let server = web_site().await;
    mount(&server, "/robots.txt", 200, "User-agent: *\nDisallow: /2025/\n").await;

    let h = common::harness();
    h.repo.insert_source(web_source(&server));

    let fetcher = fetcher();
    let engine = Engine::new(
        WebPoller::new(
            WebConfig::default(),
            fetcher.clone(),
            Arc::new(DiscoveryPipeline::new(fetcher.clone())),
            h.ingest.clone(),
        )
        .with_robots(RobotsPolicy::new(fetcher)),
    );
    let stats = engine.poll_cycle(&CancellationToken::new()).await;
    assert_eq!(stats.success, 1);
    assert_eq!(stats.total_posts, 0);
    assert!(h.repo.posts().is_empty());
    assert_eq!(h.publisher.publish_count(), 0);
}

#[tokio::test]
async fn test_site_with_nothing_records_error() {
    let server = MockServer::start().await;
    let h = common::harness();
    let source = web_source(&server);
    h.repo.insert_source(source.clone());

    let fetcher = fetcher();
    let engine = Engine::new(WebPoller::new(
        WebConfig::default(),
        fetcher.clone(),
        Arc::new(DiscoveryPipeline::new(fetcher)),
        h.ingest.clone(),
    ));
    let stats = engine.poll_cycle(&CancellationToken::new()).await;
    assert_eq!(stats.errors, 1);

    let stored = h.repo.source(source.id).unwrap();
    assert_eq!(stored.error_count, 1);
    assert_eq!(stored.last_error.as_deref(), Some("no articles discovered"));
}
