//! Media URL grammar shared by the message parser and the media warmer:
//!
//! ```text
//! {base}/media/tg/{kind}/{percent-encoded fileID}?chat={chatID}&msg={msgID}
//! ```

use crate::storage::MediaKind;

const MEDIA_PATH: &str = "/media/tg/";

const VIDEO_SUFFIXES: [&str; 6] = [".mp4", ".webm", ".ogg", ".mov", ".avi", ".mkv"];

/// Components of a media URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub kind: MediaKind,
    pub file_id: String,
    pub chat_id: i64,
    pub msg_id: i64,
}

impl MediaRef {
    /// Object-store key: `{kind}/{fileID}`.
    pub fn object_key(&self) -> String {
        format!("{}/{}", self.kind, self.file_id)
    }

    /// Whether the file ID names a thumbnail (`thumb_{id}_{hash}`).
    pub fn is_thumbnail(&self) -> bool {
        self.file_id.starts_with("thumb_")
    }
}

pub fn build_media_url(
    base_url: &str,
    kind: MediaKind,
    file_id: &str,
    chat_id: i64,
    msg_id: i64,
) -> String {
    format!(
        "{}{MEDIA_PATH}{}/{}?chat={}&msg={}",
        base_url.trim_end_matches('/'),
        kind,
        urlencoding::encode(file_id),
        chat_id,
        msg_id
    )
}

/// Inverse of [`build_media_url`]. `None` for anything not matching the grammar.
///
/// Parsed by hand rather than through a URL parser so that file IDs such as
/// `..` survive without path normalization.
pub fn parse_media_url(url: &str) -> Option<MediaRef> {
    let url = url.split('#').next().unwrap_or(url);
    let (path, query) = url.split_once('?')?;

    let start = path.rfind(MEDIA_PATH)? + MEDIA_PATH.len();
    let (kind, encoded_id) = path[start..].split_once('/')?;
    if encoded_id.is_empty() || encoded_id.contains('/') {
        return None;
    }

    let kind: MediaKind = kind.parse().ok()?;
    let file_id = urlencoding::decode(encoded_id).ok()?.into_owned();

    let mut chat_id = None;
    let mut msg_id = None;
    for pair in query.split('&') {
        match pair.split_once('=') {
            Some(("chat", v)) => chat_id = v.parse().ok(),
            Some(("msg", v)) => msg_id = v.parse().ok(),
            _ => {}
        }
    }

    Some(MediaRef {
        kind,
        file_id,
        chat_id: chat_id?,
        msg_id: msg_id?,
    })
}

/// Kind of a standalone media URL by suffix: video containers, else photo.
pub fn media_kind_for_url(url: &str) -> MediaKind {
    let path = url
        .split(['?', '#'])
        .next()
        .unwrap_or(url)
        .to_ascii_lowercase();
    if VIDEO_SUFFIXES.iter().any(|s| path.ends_with(s)) {
        MediaKind::Video
    } else {
        MediaKind::Photo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_build_media_url() {
        let url = build_media_url(
            "https://cdn.example/",
            MediaKind::Photo,
            "123_456",
            -1001,
            42,
        );
        assert_eq!(
            url,
            "https://cdn.example/media/tg/photo/123_456?chat=-1001&msg=42"
        );
    }

    #[test]
    fn test_parse_thumbnail_url() {
        let parsed =
            parse_media_url("https://cdn.example/media/tg/video/thumb_9_8?chat=5&msg=6").unwrap();
        assert_eq!(parsed.kind, MediaKind::Video);
        assert_eq!(parsed.file_id, "thumb_9_8");
        assert!(parsed.is_thumbnail());
        assert_eq!(parsed.object_key(), "video/thumb_9_8");
    }

    #[test]
    fn test_parse_rejects_foreign_urls() {
        assert!(parse_media_url("https://example.com/image.jpg").is_none());
        assert!(parse_media_url("https://x/media/tg/photo/1_2").is_none());
        assert!(parse_media_url("https://x/media/tg/sticker/1_2?chat=1&msg=2").is_none());
        assert!(parse_media_url("https://x/media/tg/photo/?chat=1&msg=2").is_none());
        assert!(parse_media_url("https://x/media/tg/photo/1_2?chat=abc&msg=2").is_none());
    }

    #[test]
    fn test_media_kind_for_url() {
        assert_eq!(media_kind_for_url("https://x/clip.MP4?sig=1"), MediaKind::Video);
        assert_eq!(media_kind_for_url("https://x/movie.mkv"), MediaKind::Video);
        assert_eq!(media_kind_for_url("https://x/photo.jpg"), MediaKind::Photo);
        assert_eq!(media_kind_for_url("https://x/mp4/page"), MediaKind::Photo);
    }

    fn kinds() -> impl Strategy<Value = MediaKind> {
        prop_oneof![
            Just(MediaKind::Photo),
            Just(MediaKind::Video),
            Just(MediaKind::Animation),
            Just(MediaKind::Document),
        ]
    }

    proptest! {
        #[test]
        fn prop_media_url_round_trip(
            kind in kinds(),
            file_id in "[^/]{1,64}",
            chat in any::<i64>(),
            msg in any::<i64>(),
        ) {
            let url = build_media_url("https://media.example", kind, &file_id, chat, msg);
            let parsed = parse_media_url(&url).unwrap();
            prop_assert_eq!(parsed, MediaRef { kind, file_id, chat_id: chat, msg_id: msg });
        }
    }
}
