//! Library-neutral view of the MTProto surface the engine needs.
//!
//! The [`TelegramApi`] trait is the seam between the client façade and a
//! concrete MTProto library; tests script it directly.

use async_trait::async_trait;
use std::sync::Arc;

use super::TelegramError;

/// A resolved channel with the credentials needed to address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPeer {
    /// Bare channel ID (no Bot-API marker)
    pub channel_id: i64,
    pub access_hash: i64,
    pub title: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoSize {
    /// Size type letter, e.g. `"m"`, `"x"`, `"y"`
    pub kind: String,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawPhoto {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub sizes: Vec<PhotoSize>,
}

impl RawPhoto {
    /// The widest available size.
    pub fn largest(&self) -> Option<&PhotoSize> {
        self.sizes.iter().max_by_key(|s| s.width)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentAttribute {
    Video {
        width: i32,
        height: i32,
        duration: f64,
    },
    Animated,
    Filename(String),
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawDocument {
    pub id: i64,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub mime_type: String,
    pub size: i64,
    pub attributes: Vec<DocumentAttribute>,
    /// Thumbnail size types, smallest first
    pub thumbs: Vec<String>,
}

impl RawDocument {
    pub fn video_attribute(&self) -> Option<(i32, i32, f64)> {
        self.attributes.iter().find_map(|a| match a {
            DocumentAttribute::Video {
                width,
                height,
                duration,
            } => Some((*width, *height, *duration)),
            _ => None,
        })
    }

    pub fn is_animated(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, DocumentAttribute::Animated))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawMedia {
    Photo(RawPhoto),
    Document(RawDocument),
}

/// A channel message as delivered by the library.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    pub id: i32,
    /// Unix seconds
    pub date: i64,
    pub text: String,
    pub grouped_id: Option<i64>,
    pub media: Option<RawMedia>,
}

/// Downloadable file location.
#[derive(Debug, Clone, PartialEq)]
pub enum FileLocation {
    Photo {
        id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        size_kind: String,
    },
    Document {
        id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        /// Thumbnail size type; empty for the full document
        thumb_kind: String,
    },
}

/// RPC surface used by the client façade.
///
/// Implementations must map the library's flood-wait errors to
/// [`TelegramError::FloodWait`].
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn resolve_username(&self, username: &str) -> Result<ChannelPeer, TelegramError>;

    /// Message history newer than nothing and older than `offset_id` (0 = latest).
    async fn get_history(
        &self,
        peer: &ChannelPeer,
        limit: i32,
        offset_id: i32,
    ) -> Result<Vec<RawMessage>, TelegramError>;

    async fn get_messages(
        &self,
        peer: &ChannelPeer,
        ids: &[i32],
    ) -> Result<Vec<RawMessage>, TelegramError>;

    /// One chunk of a file; a chunk shorter than `limit` is the last one.
    async fn get_file_chunk(
        &self,
        location: &FileLocation,
        offset: i64,
        limit: i32,
    ) -> Result<Vec<u8>, TelegramError>;

    /// Convert a possibly marked chat ID (`-100…`) to the bare channel ID.
    fn bare_channel_id(&self, chat_id: i64) -> i64;

    /// Current session blob for persistence.
    fn session_blob(&self) -> Option<Vec<u8>> {
        None
    }

    /// Stop the library's network loop.
    async fn disconnect(&self) {}
}

/// Establishes an authenticated connection from a stored session.
#[async_trait]
pub trait TelegramConnector: Send + Sync {
    async fn connect(&self, session: Vec<u8>) -> Result<Arc<dyn TelegramApi>, TelegramError>;
}

/// Bot-API marked ID convention: channels are `-(10^12 + id)`.
pub fn unmark_channel_id(chat_id: i64) -> i64 {
    const MARKER: i64 = 1_000_000_000_000;
    if chat_id < 0 {
        -chat_id - MARKER
    } else {
        chat_id
    }
}
