//! Readability-style article extraction.
//!
//! Picks the densest main-content container, joins its block-level text and
//! reports a lead image. No JavaScript rendering: static HTML only.

use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::util::{collapse_whitespace, resolve_url};

/// Candidate containers for the article body, most specific first.
const CONTENT_SELECTORS: [&str; 11] = [
    "article",
    "[itemprop='articleBody']",
    ".entry-content",
    ".post-content",
    ".article-content",
    ".article-body",
    ".post-body",
    "main",
    "[role='main']",
    "#content",
    ".content",
];

/// Block elements whose text makes up the article.
const BLOCK_SELECTOR: &str = "p, h2, h3, h4, li, blockquote, pre";

/// Subtrees never considered article text.
const BOILERPLATE_TAGS: [&str; 8] = [
    "nav", "header", "footer", "aside", "script", "style", "form", "noscript",
];

/// Extracted article.
#[derive(Debug, Clone, PartialEq)]
pub struct Readable {
    pub title: Option<String>,
    pub text: String,
    pub lead_image: Option<String>,
}

impl Readable {
    pub fn text_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Extract the readable article from a page. `None` when no text was found.
pub fn extract(html: &str, page_url: &Url) -> Option<Readable> {
    let document = Html::parse_document(html);

    let container = best_container(&document);
    let text = match container {
        Some(el) => block_text(el),
        None => String::new(),
    };
    let text = if text.is_empty() {
        body_text(&document)
    } else {
        text
    };
    if text.is_empty() {
        return None;
    }

    Some(Readable {
        title: extract_title(&document, container),
        text,
        lead_image: lead_image(&document, container, page_url),
    })
}

/// Container with the highest [`content_score`] among the selector matches.
fn best_container(document: &Html) -> Option<ElementRef<'_>> {
    CONTENT_SELECTORS
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .flat_map(|selector| document.select(&selector).collect::<Vec<_>>())
        .map(|el| (content_score(el), el))
        .filter(|(len, _)| *len > 0)
        // Earlier selectors win ties
        .fold(None, |best: Option<(usize, ElementRef<'_>)>, (len, el)| match best {
            Some((best_len, _)) if best_len >= len => best,
            _ => Some((len, el)),
        })
        .map(|(_, el)| el)
}

/// Characters of block text not inside links. Link lists (related posts,
/// tag clouds, menus) make a wrapper long without making it the article.
fn content_score(container: ElementRef<'_>) -> usize {
    let text: usize = blocks(container).iter().map(|b| b.chars().count()).sum();
    let Ok(anchor) = Selector::parse("a") else {
        return text;
    };
    let linked: usize = container
        .select(&anchor)
        .filter(|el| !inside_boilerplate(*el, container))
        .map(|el| element_text(el).chars().count())
        .sum();
    text.saturating_sub(linked)
}

fn blocks(container: ElementRef<'_>) -> Vec<String> {
    let Ok(selector) = Selector::parse(BLOCK_SELECTOR) else {
        return Vec::new();
    };

    container
        .select(&selector)
        .filter(|el| !inside_boilerplate(*el, container))
        // Nested blocks (p inside li/blockquote) would be counted twice
        .filter(|el| !has_block_ancestor(*el, container))
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

fn block_text(container: ElementRef<'_>) -> String {
    blocks(container).join("\n\n")
}

fn element_text(el: ElementRef<'_>) -> String {
    collapse_whitespace(&el.text().collect::<Vec<_>>().join(" "))
}

fn body_text(document: &Html) -> String {
    let Ok(selector) = Selector::parse("body") else {
        return String::new();
    };
    document
        .select(&selector)
        .next()
        .map(|body| {
            let parts: Vec<&str> = body
                .descendants()
                .filter_map(|node| {
                    let text = node.value().as_text()?;
                    let parent = node.parent().and_then(ElementRef::wrap)?;
                    let boring = BOILERPLATE_TAGS.contains(&parent.value().name())
                        || inside_boilerplate(parent, body);
                    (!boring).then_some(&**text)
                })
                .collect();
            collapse_whitespace(&parts.join(" "))
        })
        .unwrap_or_default()
}

fn inside_boilerplate(el: ElementRef<'_>, stop: ElementRef<'_>) -> bool {
    el.ancestors()
        .take_while(|node| node.id() != stop.id())
        .filter_map(|node| node.value().as_element())
        .any(|e| BOILERPLATE_TAGS.contains(&e.name()))
}

fn has_block_ancestor(el: ElementRef<'_>, stop: ElementRef<'_>) -> bool {
    el.ancestors()
        .take_while(|node| node.id() != stop.id())
        .filter_map(|node| node.value().as_element())
        .any(|e| matches!(e.name(), "p" | "li" | "blockquote" | "pre"))
}

fn meta_content(document: &Html, keys: &[&str]) -> Option<String> {
    let selector = Selector::parse("meta").ok()?;
    keys.iter().find_map(|key| {
        document.select(&selector).find_map(|m| {
            let el = m.value();
            let name = el.attr("property").or_else(|| el.attr("name"))?;
            if name.eq_ignore_ascii_case(key) {
                el.attr("content")
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(str::to_owned)
            } else {
                None
            }
        })
    })
}

fn extract_title(document: &Html, container: Option<ElementRef<'_>>) -> Option<String> {
    if let Some(title) = meta_content(document, &["og:title", "twitter:title"]) {
        return Some(collapse_whitespace(&title));
    }

    let h1 = Selector::parse("h1").ok()?;
    let from_h1 = container
        .and_then(|c| c.select(&h1).next())
        .or_else(|| document.select(&h1).next())
        .map(|el| collapse_whitespace(&el.text().collect::<Vec<_>>().join(" ")))
        .filter(|t| !t.is_empty());
    if from_h1.is_some() {
        return from_h1;
    }

    let title = Selector::parse("title").ok()?;
    document
        .select(&title)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

fn lead_image(document: &Html, container: Option<ElementRef<'_>>, page_url: &Url) -> Option<String> {
    if let Some(image) = meta_content(document, &["og:image", "twitter:image"]) {
        if let Some(url) = resolve_url(&image, page_url) {
            return Some(url.to_string());
        }
    }

    let img = Selector::parse("img").ok()?;
    container?.select(&img).find_map(|el| {
        let src = el
            .value()
            .attr("data-src")
            .or_else(|| el.value().attr("src"))?;
        resolve_url(src, page_url).map(|u| u.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("https://news.example/2025/story").unwrap()
    }

    #[test]
    fn test_extracts_article_text_and_title() {
        let html = r#"<html><head><title>Site | Story</title></head><body>
            <nav><p>Home About Contact</p></nav>
            <article>
              <h1>The Story</h1>
              <p>First paragraph of the story.</p>
              <p>Second   paragraph,
                 wrapped.</p>
              <aside><p>Related links</p></aside>
            </article>
            <footer><p>Copyright</p></footer>
        </body></html>"#;

        let readable = extract(html, &url()).unwrap();
        assert_eq!(readable.title.as_deref(), Some("The Story"));
        assert_eq!(
            readable.text,
            "First paragraph of the story.\n\nSecond paragraph, wrapped."
        );
    }

    #[test]
    fn test_link_lists_do_not_outscore_prose() {
        let html = r#"<html><body>
            <div class="content"><ul>
              <li><a href="/a">A much longer related headline about something else</a></li>
              <li><a href="/b">Another much longer related headline for the sidebar</a></li>
              <li><a href="/c">Yet another related headline that is rather long too</a></li>
            </ul></div>
            <div class="post-body"><p>The actual story, told briefly.</p></div>
        </body></html>"#;

        let readable = extract(html, &url()).unwrap();
        assert_eq!(readable.text, "The actual story, told briefly.");
    }

    #[test]
    fn test_og_metadata_preferred() {
        let html = r#"<html><head>
            <meta property="og:title" content="OG Title">
            <meta property="og:image" content="/img/lead.jpg">
        </head><body><main><p>Body text</p><img src="/other.jpg"></main></body></html>"#;

        let readable = extract(html, &url()).unwrap();
        assert_eq!(readable.title.as_deref(), Some("OG Title"));
        assert_eq!(
            readable.lead_image.as_deref(),
            Some("https://news.example/img/lead.jpg")
        );
    }

    #[test]
    fn test_lead_image_falls_back_to_first_content_img() {
        let html = r#"<html><body><article><p>Text</p>
            <img src="data:image/gif;base64,AAA"><img data-src="/real.jpg"></article></body></html>"#;
        let readable = extract(html, &url()).unwrap();
        assert_eq!(
            readable.lead_image.as_deref(),
            Some("https://news.example/real.jpg")
        );
    }

    #[test]
    fn test_body_fallback_without_containers() {
        let html = "<html><body><div>Just some loose text</div><script>var x;</script></body></html>";
        let readable = extract(html, &url()).unwrap();
        assert_eq!(readable.text, "Just some loose text");
    }

    #[test]
    fn test_empty_page_yields_none() {
        assert!(extract("<html><body></body></html>", &url()).is_none());
    }
}
