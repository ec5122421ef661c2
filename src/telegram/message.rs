use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::api::{RawDocument, RawMedia, RawMessage, RawPhoto};
use crate::media::build_media_url;
use crate::storage::{MediaKind, MediaObject};
use crate::util::{first_line, strip_control_chars, truncate_chars};

const TITLE_MAX_CHARS: usize = 100;
const EMPTY_TITLE: &str = "Message";

/// A channel message reduced to what the engine stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedMessage {
    pub message_id: i64,
    pub channel_id: i64,
    pub title: String,
    pub content: String,
    pub media: Vec<MediaObject>,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_group_id: Option<i64>,
}

/// Maps raw protocol messages to [`NormalizedMessage`]s, building media URLs
/// under `media_base_url`.
#[derive(Debug, Clone)]
pub struct MessageParser {
    media_base_url: String,
}

impl MessageParser {
    pub fn new(media_base_url: impl Into<String>) -> Self {
        Self {
            media_base_url: media_base_url.into(),
        }
    }

    pub fn normalize(&self, message: &RawMessage, channel_id: i64) -> NormalizedMessage {
        let content = strip_control_chars(&message.text).trim().to_owned();
        let msg_id = i64::from(message.id);

        let media = match &message.media {
            Some(RawMedia::Photo(photo)) => vec![self.photo_media(photo, channel_id, msg_id)],
            Some(RawMedia::Document(doc)) => vec![self.document_media(doc, channel_id, msg_id)],
            None => Vec::new(),
        };

        NormalizedMessage {
            message_id: msg_id,
            channel_id,
            title: title_for(&content),
            content,
            media,
            published_at: DateTime::from_timestamp(message.date, 0).unwrap_or_default(),
            media_group_id: message.grouped_id,
        }
    }

    /// Normalize a history page and merge its albums.
    pub fn normalize_all(&self, messages: &[RawMessage], channel_id: i64) -> Vec<NormalizedMessage> {
        group_albums(
            messages
                .iter()
                .map(|m| self.normalize(m, channel_id))
                .collect(),
        )
    }

    fn photo_media(&self, photo: &RawPhoto, chat_id: i64, msg_id: i64) -> MediaObject {
        let file_id = format!("{}_{}", photo.id, photo.access_hash);
        let mut media = MediaObject::new(
            MediaKind::Photo,
            build_media_url(&self.media_base_url, MediaKind::Photo, &file_id, chat_id, msg_id),
        );
        if let Some(size) = photo.largest() {
            media.width = Some(size.width);
            media.height = Some(size.height);
        }
        media
    }

    fn document_media(&self, doc: &RawDocument, chat_id: i64, msg_id: i64) -> MediaObject {
        let video = doc.video_attribute();
        let kind = if doc.is_animated() {
            MediaKind::Animation
        } else if video.is_some() {
            MediaKind::Video
        } else {
            MediaKind::Document
        };

        let file_id = format!("{}_{}", doc.id, doc.access_hash);
        let mut media = MediaObject::new(
            kind,
            build_media_url(&self.media_base_url, kind, &file_id, chat_id, msg_id),
        );

        if let Some((width, height, duration)) = video {
            media.width = Some(width);
            media.height = Some(height);
            media.duration = Some(duration);
        }

        if matches!(kind, MediaKind::Video | MediaKind::Animation) && !doc.thumbs.is_empty() {
            let thumb_id = format!("thumb_{}_{}", doc.id, doc.access_hash);
            media.preview_url = Some(build_media_url(
                &self.media_base_url,
                MediaKind::Photo,
                &thumb_id,
                chat_id,
                msg_id,
            ));
        }
        media
    }
}

fn title_for(content: &str) -> String {
    let line = first_line(content);
    if line.is_empty() {
        EMPTY_TITLE.to_owned()
    } else {
        truncate_chars(line, TITLE_MAX_CHARS).into_owned()
    }
}

/// Merge messages sharing a media-group ID into one post each.
///
/// The merged post takes title and content from the member with the longest
/// content (earliest member on ties), the media of all members in ascending
/// message-ID order, and the ID and timestamp of the earliest member. Output
/// is sorted by publish time, then message ID.
pub fn group_albums(messages: Vec<NormalizedMessage>) -> Vec<NormalizedMessage> {
    let mut out = Vec::with_capacity(messages.len());
    let mut albums: HashMap<i64, Vec<NormalizedMessage>> = HashMap::new();

    for message in messages {
        match message.media_group_id {
            Some(group) => albums.entry(group).or_default().push(message),
            None => out.push(message),
        }
    }

    out.extend(albums.into_values().map(merge_album));
    out.sort_by(|a, b| {
        a.published_at
            .cmp(&b.published_at)
            .then(a.message_id.cmp(&b.message_id))
    });
    out
}

fn merge_album(mut members: Vec<NormalizedMessage>) -> NormalizedMessage {
    members.sort_by_key(|m| m.message_id);

    let mut richest = 0;
    for (i, m) in members.iter().enumerate() {
        if m.content.chars().count() > members[richest].content.chars().count() {
            richest = i;
        }
    }

    let first = &members[0];
    NormalizedMessage {
        message_id: first.message_id,
        channel_id: first.channel_id,
        title: members[richest].title.clone(),
        content: members[richest].content.clone(),
        media: members.iter().flat_map(|m| m.media.iter().cloned()).collect(),
        published_at: first.published_at,
        media_group_id: first.media_group_id,
    }
}
