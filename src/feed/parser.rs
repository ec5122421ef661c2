use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Link};
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

const IMAGE_EXTENSIONS: [&str; 8] = [
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".avif", ".bmp", ".svg",
];

/// `<img>` attributes checked in order; the first non-empty one wins.
const IMG_SOURCE_ATTRS: [&str; 4] = ["data-src", "data-lazy-src", "data-original", "src"];

#[derive(Debug, Error)]
pub enum FeedParseError {
    #[error("Feed parse error: {0}")]
    Parse(#[from] feed_rs::parser::ParseFeedError),
}

/// A parsed feed.
#[derive(Debug, Clone, Default)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub items: Vec<FeedItem>,
}

/// One feed entry in the uniform shape shared by RSS and Atom.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedItem {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub content: Option<String>,
    /// First non-null of published / updated
    pub published_at: Option<DateTime<Utc>>,
    pub guid: String,
    /// First enclosure that is an image
    pub enclosure_url: Option<String>,
    /// Insertion-ordered, deduplicated image URLs
    pub images: Vec<String>,
}

impl FeedItem {
    /// Body text: full content when present, description otherwise.
    pub fn body(&self) -> &str {
        self.content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .or(self.description.as_deref())
            .unwrap_or("")
    }
}

pub fn parse_feed(bytes: &[u8]) -> Result<ParsedFeed, FeedParseError> {
    let feed = parser::parse(bytes)?;
    let item_images = item_image_elements(bytes);

    let items = feed
        .entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let item_image = item_images.get(index).cloned().flatten();
            convert_entry(entry, item_image)
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        items,
    })
}

/// The entry's article URL: an `alternate` (or rel-less) link, else the first.
///
/// Atom entries from Blogger and similar hosts list `replies`, `edit` and
/// `self` links ahead of the article itself.
fn canonical_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| match l.rel.as_deref() {
            None => true,
            Some(rel) => rel.eq_ignore_ascii_case("alternate"),
        })
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}

fn convert_entry(entry: Entry, item_image: Option<String>) -> FeedItem {
    let link = canonical_link(&entry.links);
    let published_at = entry.published.or(entry.updated);
    let title = entry
        .title
        .map(|t| t.content)
        .unwrap_or_else(|| "Untitled".to_string());
    let description = entry.summary.map(|s| s.content);
    let content = entry.content.and_then(|c| c.body);

    let existing_id = if entry.id.is_empty() {
        None
    } else {
        Some(entry.id.as_str())
    };
    let guid = generate_guid(existing_id, link.as_deref(), &title, published_at);

    let enclosure_url = entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| {
            let url = c.url.as_ref()?;
            let is_image_type = c
                .content_type
                .as_ref()
                .is_some_and(|ct| ct.essence().to_string().starts_with("image/"));
            (is_image_type || has_image_extension(url.path())).then(|| url.to_string())
        });

    let mut images = ImageList::default();
    if let Some(url) = item_image {
        images.push(url);
    }
    for media in &entry.media {
        for c in &media.content {
            if let Some(url) = &c.url {
                let is_image = c
                    .content_type
                    .as_ref()
                    .map(|ct| ct.essence().to_string().starts_with("image/"))
                    .unwrap_or_else(|| has_image_extension(url.path()));
                if is_image {
                    images.push(url.to_string());
                }
            }
        }
        for thumb in &media.thumbnails {
            images.push(thumb.image.uri.clone());
        }
    }

    let base = link.as_deref().and_then(|l| Url::parse(l).ok());
    for html in [content.as_deref(), description.as_deref()].into_iter().flatten() {
        for url in html_images(html, base.as_ref()) {
            images.push(url);
        }
    }

    FeedItem {
        title,
        link,
        description,
        content,
        published_at,
        guid,
        enclosure_url,
        images: images.into_inner(),
    }
}

/// Entry ID when present, otherwise SHA-256 of `link|title|published`.
fn generate_guid(
    existing: Option<&str>,
    url: Option<&str>,
    title: &str,
    published: Option<DateTime<Utc>>,
) -> String {
    if let Some(guid) = existing {
        let trimmed = guid.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let input = format!(
        "{}|{}|{}",
        url.unwrap_or(""),
        title,
        published.map(|p| p.timestamp().to_string()).unwrap_or_default()
    );
    let hash = Sha256::digest(input.as_bytes());
    format!("{:x}", hash)
}

fn has_image_extension(path: &str) -> bool {
    let path = path.to_ascii_lowercase();
    IMAGE_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}

/// Ordered set of image URLs; rejects blanks and `data:` URIs.
#[derive(Default)]
struct ImageList(Vec<String>);

impl ImageList {
    fn push(&mut self, url: String) {
        let url = url.trim();
        if url.is_empty() || url.starts_with("data:") {
            return;
        }
        if !self.0.iter().any(|u| u == url) {
            self.0.push(url.to_owned());
        }
    }

    fn into_inner(self) -> Vec<String> {
        self.0
    }
}

/// `<img>` URLs in an HTML fragment, one per element.
fn html_images(html: &str, base: Option<&Url>) -> Vec<String> {
    let Ok(selector) = Selector::parse("img") else {
        return Vec::new();
    };
    let document = Html::parse_fragment(html);

    document
        .select(&selector)
        .filter_map(|img| {
            let el = img.value();
            let candidate = IMG_SOURCE_ATTRS
                .iter()
                .filter_map(|attr| el.attr(attr))
                .map(str::trim)
                .find(|v| !v.is_empty())
                .or_else(|| {
                    el.attr("srcset")
                        .and_then(|s| s.split(',').next())
                        .and_then(|c| c.split_whitespace().next())
                })?;
            if candidate.starts_with("data:") {
                return None;
            }
            match base {
                Some(base) => base.join(candidate).ok().map(|u| u.to_string()),
                None => Url::parse(candidate).ok().map(|u| u.to_string()),
            }
        })
        .collect()
}

/// Item-level `<image>` elements (RSS extension), one slot per item/entry in
/// document order. Accepts text content, a nested `<url>`, or an
/// `href`/`url` attribute.
fn item_image_elements(bytes: &[u8]) -> Vec<Option<String>> {
    // SEC-002: quick-xml 0.37.5 does not expand custom entity declarations;
    // the version is pinned in Cargo.toml.
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut slots: Vec<Option<String>> = Vec::new();
    let mut in_item = false;
    let mut in_image = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    in_item = true;
                    slots.push(None);
                }
                b"image" if in_item => {
                    in_image = true;
                    if let Some(url) = url_attribute(&e, &reader) {
                        set_slot(&mut slots, url);
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if in_item && e.name().as_ref() == b"image" => {
                if let Some(url) = url_attribute(&e, &reader) {
                    set_slot(&mut slots, url);
                }
            }
            Ok(Event::Text(t)) if in_image => {
                if let Ok(text) = t.unescape() {
                    set_slot(&mut slots, text.trim().to_string());
                }
            }
            Ok(Event::CData(c)) if in_image => {
                set_slot(&mut slots, String::from_utf8_lossy(&c).trim().to_string());
            }
            Ok(Event::End(e)) => match e.name().as_ref() {
                b"item" | b"entry" => {
                    in_item = false;
                    in_image = false;
                }
                b"image" => in_image = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            // feed-rs already accepted the document; a side-pass failure only
            // loses item-level images
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    slots
}

fn url_attribute(e: &quick_xml::events::BytesStart<'_>, reader: &Reader<&[u8]>) -> Option<String> {
    e.attributes().flatten().find_map(|attr| {
        matches!(attr.key.as_ref(), b"href" | b"url")
            .then(|| attr.decode_and_unescape_value(reader.decoder()).ok())
            .flatten()
            .map(|v| v.trim().to_string())
    })
}

/// Fill the current item's slot if still empty.
fn set_slot(slots: &mut [Option<String>], url: String) {
    if url.is_empty() || url.starts_with("data:") {
        return;
    }
    if let Some(slot @ None) = slots.last_mut() {
        *slot = Some(url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/" xmlns:content="http://purl.org/rss/1.0/modules/content/">
  <channel>
    <title>Example</title>
    <link>https://example.com</link>
    <item>
      <title>First</title>
      <link>https://example.com/a</link>
      <guid>a-guid</guid>
      <pubDate>Mon, 06 Jan 2025 10:00:00 GMT</pubDate>
      <image>https://example.com/item.jpg</image>
      <enclosure url="https://example.com/audio.mp3" type="audio/mpeg" length="1"/>
      <enclosure url="https://example.com/cover.png" type="image/png" length="1"/>
      <media:thumbnail url="https://example.com/thumb.jpg"/>
      <description><![CDATA[<p>Hello <img data-src="/lazy.jpg" src="data:image/gif;base64,AAA"> <img srcset="https://cdn.example.com/s.jpg 480w, https://cdn.example.com/l.jpg 1024w"></p>]]></description>
    </item>
    <item>
      <title>Second</title>
      <link>https://example.com/b</link>
      <description>No images</description>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn test_atom_entry_prefers_alternate_link() {
        let atom = r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <id>tag:blogger.com,1999:blog-1</id>
  <title>Blog</title>
  <updated>2025-01-06T10:00:00Z</updated>
  <entry>
    <id>tag:blogger.com,1999:blog-1.post-2</id>
    <title>Post</title>
    <updated>2025-01-06T10:00:00Z</updated>
    <link rel="replies" type="application/atom+xml" href="https://blog.example/feeds/2/comments/default"/>
    <link rel="replies" type="text/html" href="https://blog.example/2025/01/post.html#comment-form"/>
    <link rel="edit" type="application/atom+xml" href="https://www.blogger.com/feeds/1/posts/default/2"/>
    <link rel="self" type="application/atom+xml" href="https://blog.example/feeds/posts/default/2"/>
    <link rel="alternate" type="text/html" href="https://blog.example/2025/01/post.html"/>
  </entry>
</feed>"#;
        let feed = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(
            feed.items[0].link.as_deref(),
            Some("https://blog.example/2025/01/post.html")
        );
    }

    #[test]
    fn test_canonical_link_falls_back_to_first() {
        let link = |href: &str, rel: &str| Link {
            href: href.to_string(),
            rel: Some(rel.to_string()),
            media_type: None,
            href_lang: None,
            title: None,
            length: None,
        };
        let links = vec![
            link("https://a.example/comments", "replies"),
            link("https://a.example/self", "self"),
        ];
        assert_eq!(
            canonical_link(&links).as_deref(),
            Some("https://a.example/comments")
        );
        assert_eq!(canonical_link(&[]), None);
    }

    #[test]
    fn test_parse_rss_items_in_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(feed.title.as_deref(), Some("Example"));
        assert_eq!(feed.items.len(), 2);
        assert_eq!(feed.items[0].title, "First");
        assert_eq!(feed.items[0].link.as_deref(), Some("https://example.com/a"));
        assert_eq!(feed.items[0].guid, "a-guid");
        assert!(feed.items[0].published_at.is_some());
        assert_eq!(feed.items[1].title, "Second");
    }

    #[test]
    fn test_enclosure_picks_first_image() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        assert_eq!(
            feed.items[0].enclosure_url.as_deref(),
            Some("https://example.com/cover.png")
        );
        assert_eq!(feed.items[1].enclosure_url, None);
    }

    #[test]
    fn test_images_union_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        let images = &feed.items[0].images;
        assert_eq!(images[0], "https://example.com/item.jpg");
        assert!(images.contains(&"https://example.com/cover.png".to_string()));
        assert!(images.contains(&"https://example.com/thumb.jpg".to_string()));
        assert!(images.contains(&"https://example.com/lazy.jpg".to_string()));
        assert!(images.contains(&"https://cdn.example.com/s.jpg".to_string()));
        assert!(!images.iter().any(|u| u.starts_with("data:")));
        assert!(feed.items[1].images.is_empty());
    }

    #[test]
    fn test_parse_atom() {
        let atom = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Example</title>
  <entry>
    <title>Entry</title>
    <link href="https://example.org/entry"/>
    <id>urn:uuid:1</id>
    <updated>2025-02-01T12:00:00Z</updated>
    <content type="html">&lt;p&gt;Body&lt;/p&gt;</content>
  </entry>
</feed>"#;
        let feed = parse_feed(atom.as_bytes()).unwrap();
        assert_eq!(feed.items.len(), 1);
        let item = &feed.items[0];
        assert_eq!(item.link.as_deref(), Some("https://example.org/entry"));
        // published absent: falls back to updated
        assert_eq!(
            item.published_at.map(|d| d.to_rfc3339()),
            Some("2025-02-01T12:00:00+00:00".to_string())
        );
        assert!(item.body().contains("Body"));
    }

    #[test]
    fn test_guid_fallback_is_stable_hash() {
        let a = generate_guid(None, Some("https://x/1"), "T", None);
        let b = generate_guid(Some("  "), Some("https://x/1"), "T", None);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, generate_guid(None, Some("https://x/2"), "T", None));
    }

    #[test]
    fn test_invalid_feed_errors() {
        assert!(parse_feed(b"<html><body>nope</body></html>").is_err());
    }
}
