use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashMap;
use std::sync::LazyLock;
use url::Url;

use super::url::media_kind_for_url;
use crate::storage::MediaObject;
use crate::util::resolve_url;

/// Per-element `<img>` source attributes; the first non-empty one wins.
const IMG_ATTRS: [&str; 8] = [
    "src",
    "data-src",
    "data-lazy-src",
    "data-original",
    "data-bg",
    "data-background",
    "data-image",
    "data-full-src",
];

const META_KEYS: [&str; 5] = [
    "og:image",
    "og:video",
    "og:video:url",
    "twitter:image",
    "twitter:player:stream",
];

/// Path substrings marking site chrome rather than content.
const CHROME_PATH_PATTERNS: [&str; 9] = [
    "/logo", "logo.", "logo-", "logo_", "/icons/", "favicon", "avatar", "/profile", "badge",
];

/// Filename prefixes marking site chrome rather than content.
const CHROME_NAME_PREFIXES: [&str; 6] = ["logo", "icon", "avatar", "thumb", "badge", "profile"];

/// Keywords in `class`/`id`/`alt` of the `<img>` itself.
const ELEMENT_KEYWORDS: [&str; 10] = [
    "logo", "icon", "avatar", "brand", "widget", "nav", "sidebar", "menu", "header", "footer",
];

/// Ancestor tags whose images are chrome.
const CHROME_ANCESTOR_TAGS: [&str; 4] = ["header", "nav", "footer", "aside"];

/// Ancestor class keywords whose images are chrome.
const CHROME_ANCESTOR_CLASSES: [&str; 7] =
    ["header", "nav", "footer", "aside", "sidebar", "menu", "widget"];

const MIN_WIDTH: u32 = 400;
const MIN_HEIGHT: u32 = 300;

/// Size-variant suffixes stripped to form the dedup key.
static DIMENSION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_]\d+x\d+").expect("valid regex"));
static VARIANT_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[-_](thumb|small|medium|large|full|original)").expect("valid regex")
});

/// Quality hints found as path tokens, best first.
const QUALITY_PRIORITIES: [(&str, u8); 11] = [
    ("original", 100),
    ("full", 95),
    ("large", 90),
    ("big", 85),
    ("medium", 70),
    ("med", 70),
    ("small", 50),
    ("thumbnail", 30),
    ("thumb", 30),
    ("icon", 20),
    ("", 60),
];

/// Collects, filters, deduplicates and ranks media URLs in an HTML fragment.
#[derive(Debug, Clone, Copy)]
pub struct MediaExtractor {
    prefer_high_quality: bool,
}

impl Default for MediaExtractor {
    fn default() -> Self {
        Self {
            prefer_high_quality: true,
        }
    }
}

struct Candidate<'a> {
    url: String,
    img: Option<ElementRef<'a>>,
}

impl MediaExtractor {
    pub fn new(prefer_high_quality: bool) -> Self {
        Self {
            prefer_high_quality,
        }
    }

    /// Media URLs of `html`, resolved against `base`, in document order.
    pub fn extract_urls(&self, html: &str, base: &Url) -> Vec<String> {
        let document = Html::parse_document(html);
        let candidates = self.collect(&document, base);

        let mut seen: HashMap<String, Option<ElementRef<'_>>> = HashMap::new();
        let mut ordered = Vec::new();
        for c in candidates {
            match seen.get_mut(&c.url) {
                Some(slot) => {
                    if slot.is_none() {
                        *slot = c.img;
                    }
                }
                None => {
                    ordered.push(c.url.clone());
                    seen.insert(c.url, c.img);
                }
            }
        }

        let surviving: Vec<String> = ordered
            .into_iter()
            .filter(|url| is_content_url(url))
            .filter(|url| match seen.get(url).copied().flatten() {
                Some(img) => passes_context(img),
                None => true,
            })
            .collect();

        self.dedup(surviving)
    }

    /// Like [`extract_urls`](Self::extract_urls), typed by URL suffix.
    pub fn extract(&self, html: &str, base: &Url) -> Vec<MediaObject> {
        self.extract_urls(html, base)
            .into_iter()
            .map(|url| MediaObject::new(media_kind_for_url(&url), url))
            .collect()
    }

    fn collect<'a>(&self, document: &'a Html, base: &Url) -> Vec<Candidate<'a>> {
        let mut out: Vec<Candidate<'a>> = Vec::new();
        let mut push = |raw: &str, img: Option<ElementRef<'a>>| {
            let raw = raw.trim();
            if raw.is_empty() || raw.starts_with("data:") {
                return;
            }
            if let Some(url) = resolve_url(raw, base) {
                out.push(Candidate {
                    url: url.to_string(),
                    img,
                });
            }
        };

        if let Ok(selector) = Selector::parse("img") {
            for img in document.select(&selector) {
                let el = img.value();
                let srcset: Vec<&str> = el.attr("srcset").map(srcset_urls).unwrap_or_default();
                let attr_src = IMG_ATTRS
                    .iter()
                    .filter_map(|a| el.attr(a))
                    .map(str::trim)
                    .find(|v| !v.is_empty());

                if self.prefer_high_quality {
                    match srcset.first() {
                        Some(first) => push(first, Some(img)),
                        None => {
                            if let Some(src) = attr_src {
                                push(src, Some(img));
                            }
                        }
                    }
                } else {
                    for url in &srcset {
                        push(url, Some(img));
                    }
                    if let Some(src) = attr_src {
                        push(src, Some(img));
                    }
                }
            }
        }

        if let Ok(selector) = Selector::parse("video") {
            for video in document.select(&selector) {
                for attr in ["src", "poster"] {
                    if let Some(v) = video.value().attr(attr) {
                        push(v, None);
                    }
                }
            }
        }

        if let Ok(selector) = Selector::parse("source") {
            for source in document.select(&selector) {
                if let Some(v) = source.value().attr("src") {
                    push(v, None);
                } else if let Some(first) = source
                    .value()
                    .attr("srcset")
                    .and_then(|s| srcset_urls(s).into_iter().next())
                {
                    push(first, None);
                }
            }
        }

        if let Ok(selector) = Selector::parse("meta") {
            for meta in document.select(&selector) {
                let el = meta.value();
                let Some(key) = el.attr("property").or_else(|| el.attr("name")) else {
                    continue;
                };
                if META_KEYS.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                    if let Some(content) = el.attr("content") {
                        push(content, None);
                    }
                }
            }
        }

        out
    }

    /// Group by filename key, keeping group order by first appearance.
    fn dedup(&self, urls: Vec<String>) -> Vec<String> {
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for url in urls {
            let key = filename_key(&url);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(url),
                None => groups.push((key, vec![url])),
            }
        }

        groups
            .into_iter()
            .filter_map(|(_, members)| {
                if self.prefer_high_quality {
                    // First of the highest priority
                    members
                        .into_iter()
                        .rev()
                        .max_by_key(|u| quality_priority(u))
                } else {
                    members.into_iter().next()
                }
            })
            .collect()
    }
}

/// URL tokens of a srcset, in order. Each comma-separated entry contributes
/// the portion before its first whitespace.
fn srcset_urls(srcset: &str) -> Vec<&str> {
    srcset
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
        .collect()
}

fn path_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(u) => u.path().to_ascii_lowercase(),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .unwrap_or(url)
            .to_ascii_lowercase(),
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Rejects logos, icons, avatars and similar chrome by URL alone.
fn is_content_url(url: &str) -> bool {
    let path = path_of(url);
    if path.ends_with(".ico") {
        return false;
    }
    if CHROME_PATH_PATTERNS.iter().any(|p| path.contains(p)) {
        return false;
    }
    let name = file_name(&path);
    !CHROME_NAME_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Rejects small or chrome-positioned `<img>` elements.
fn passes_context(img: ElementRef<'_>) -> bool {
    let el = img.value();

    let dimension = |attr: &str| -> Option<u32> {
        el.attr(attr)
            .map(|v| v.trim().trim_end_matches("px"))
            .and_then(|v| v.parse().ok())
    };
    if dimension("width").is_some_and(|w| w < MIN_WIDTH)
        || dimension("height").is_some_and(|h| h < MIN_HEIGHT)
    {
        return false;
    }

    for attr in ["class", "id", "alt"] {
        if let Some(value) = el.attr(attr) {
            let value = value.to_ascii_lowercase();
            if ELEMENT_KEYWORDS.iter().any(|k| value.contains(k)) {
                return false;
            }
        }
    }

    !img.ancestors()
        .filter_map(|node| node.value().as_element())
        .any(|ancestor| {
            CHROME_ANCESTOR_TAGS.contains(&ancestor.name())
                || ancestor.attr("class").is_some_and(|class| {
                    let class = class.to_ascii_lowercase();
                    CHROME_ANCESTOR_CLASSES.iter().any(|k| class.contains(k))
                })
        })
}

/// Lowercased last path segment with size-variant suffixes removed.
pub fn filename_key(url: &str) -> String {
    let path = path_of(url);
    let name = file_name(&path);
    let name = DIMENSION_SUFFIX.replace_all(name, "");
    VARIANT_SUFFIX.replace_all(&name, "").into_owned()
}

/// Quality score from path tokens (see `QUALITY_PRIORITIES`).
pub fn quality_priority(url: &str) -> u8 {
    let path = path_of(url);
    let tokens: Vec<&str> = path
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect();

    QUALITY_PRIORITIES
        .iter()
        .find(|(token, _)| token.is_empty() || tokens.contains(token))
        .map(|(_, priority)| *priority)
        .unwrap_or(60)
}
