use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Cap on article URLs taken from one sitemap.
pub const MAX_SITEMAP_URLS: usize = 50;

/// Article-looking path segments used when no dated URLs exist.
const ARTICLE_SEGMENTS: [&str; 6] = ["/article/", "/post/", "/blog/", "/news/", "/story/", "/entry/"];

static YEAR_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/20[2-9][0-9]/").expect("valid regex"));

/// `<loc>` entries of a sitemap or sitemap index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sitemap {
    pub locs: Vec<String>,
    /// True for `<sitemapindex>` documents, whose locs are child sitemaps
    pub is_index: bool,
}

/// Parse sitemap XML. Malformed documents yield whatever was read before the
/// error.
pub fn parse_sitemap(bytes: &[u8]) -> Sitemap {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().trim_text(true);

    let mut sitemap = Sitemap::default();
    let mut in_loc = false;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"sitemapindex" => sitemap.is_index = true,
                b"loc" => in_loc = true,
                _ => {}
            },
            Ok(Event::Text(t)) if in_loc => {
                if let Ok(text) = t.unescape() {
                    push_loc(&mut sitemap.locs, &text);
                }
            }
            Ok(Event::CData(c)) if in_loc => {
                push_loc(&mut sitemap.locs, &String::from_utf8_lossy(&c));
            }
            Ok(Event::End(e)) if e.local_name().as_ref() == b"loc" => in_loc = false,
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Sitemap XML error, keeping partial result");
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    sitemap
}

fn push_loc(locs: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        locs.push(text.to_owned());
    }
}

/// Pick article URLs: dated paths (`/20[2-9]x/`) when any exist, otherwise
/// paths with an article-like segment. At most [`MAX_SITEMAP_URLS`].
pub fn select_article_urls(locs: &[String]) -> Vec<String> {
    let path_of = |loc: &str| {
        Url::parse(loc)
            .map(|u| u.path().to_owned())
            .unwrap_or_else(|_| loc.to_owned())
    };

    let dated: Vec<String> = locs
        .iter()
        .filter(|loc| YEAR_SEGMENT.is_match(&path_of(loc)))
        .take(MAX_SITEMAP_URLS)
        .cloned()
        .collect();
    if !dated.is_empty() {
        return dated;
    }

    locs.iter()
        .filter(|loc| {
            let path = path_of(loc);
            ARTICLE_SEGMENTS.iter().any(|s| path.contains(s))
        })
        .take(MAX_SITEMAP_URLS)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_urlset() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://blog.example/2025/post-1</loc></url>
  <url><loc> https://blog.example/about </loc></url>
</urlset>"#;
        let sitemap = parse_sitemap(xml.as_bytes());
        assert!(!sitemap.is_index);
        assert_eq!(
            sitemap.locs,
            vec!["https://blog.example/2025/post-1", "https://blog.example/about"]
        );
    }

    #[test]
    fn test_parse_index() {
        let xml = r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>https://blog.example/sitemap-posts.xml</loc></sitemap>
</sitemapindex>"#;
        let sitemap = parse_sitemap(xml.as_bytes());
        assert!(sitemap.is_index);
        assert_eq!(sitemap.locs, vec!["https://blog.example/sitemap-posts.xml"]);
    }

    #[test]
    fn test_year_pattern_wins() {
        let locs = vec![
            "https://blog.example/2025/post-1".to_string(),
            "https://blog.example/about".to_string(),
            "https://blog.example/blog/undated".to_string(),
            "https://blog.example/2019/too-old".to_string(),
        ];
        assert_eq!(
            select_article_urls(&locs),
            vec!["https://blog.example/2025/post-1"]
        );
    }

    #[test]
    fn test_segment_fallback_and_cap() {
        let mut locs: Vec<String> = (0..80)
            .map(|i| format!("https://site.example/news/item-{i}"))
            .collect();
        locs.push("https://site.example/contact".to_string());
        let selected = select_article_urls(&locs);
        assert_eq!(selected.len(), MAX_SITEMAP_URLS);
        assert!(selected.iter().all(|u| u.contains("/news/")));
    }
}
