use url::Url;

/// File extensions that mark a URL as a binary asset rather than an article.
const MEDIA_EXTENSIONS: &[&str] = &[
    ".jpg", ".jpeg", ".png", ".gif", ".webp", ".svg", ".bmp", ".ico", ".avif", ".mp4", ".webm",
    ".ogg", ".mov", ".avi", ".mkv", ".mp3", ".wav", ".pdf", ".zip",
];

/// Resolves a potentially relative URL against a base URL.
///
/// Returns `None` for `data:`, `javascript:` and `mailto:` references and for
/// anything that does not resolve to an http(s) URL.
pub fn resolve_url(href: &str, base: &Url) -> Option<Url> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let lower = href.to_ascii_lowercase();
    if lower.starts_with("data:") || lower.starts_with("javascript:") || lower.starts_with("mailto:")
    {
        return None;
    }

    let resolved = base.join(href).ok()?;
    match resolved.scheme() {
        "http" | "https" => Some(resolved),
        _ => None,
    }
}

/// Lowercased host of a URL string, if it parses.
pub fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

/// Whether two URLs share a host, ignoring a leading `www.`.
pub fn same_host(a: &Url, b: &Url) -> bool {
    fn bare(u: &Url) -> Option<String> {
        u.host_str()
            .map(|h| h.trim_start_matches("www.").to_ascii_lowercase())
    }
    matches!((bare(a), bare(b)), (Some(x), Some(y)) if x == y)
}

/// Whether the URL path ends in a known media/binary extension.
pub fn has_media_extension(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    MEDIA_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
