//! MTProto channel access.
//!
//! - [`api`] - library-neutral RPC trait and raw message types
//! - [`client`] - connection façade with session storage and peer caching
//! - [`session`] - atomic session blob storage
//! - [`rate`] - adaptive delay driven by flood-waits
//! - [`message`] - message normalization and album grouping
//! - [`cache`] - shared username → channel cache
//! - [`files`] - file download and message refetch handlers

pub mod api;
pub mod cache;
pub mod client;
pub mod files;
#[cfg(feature = "grammers")]
pub mod grammers;
pub mod message;
pub mod rate;
pub mod session;

use std::time::Duration;
use thiserror::Error;

pub use api::{
    unmark_channel_id, ChannelPeer, DocumentAttribute, FileLocation, PhotoSize, RawDocument,
    RawMedia, RawMessage, RawPhoto, TelegramApi, TelegramConnector,
};
pub use cache::{ChannelCache, ChannelCacheEntry, MemoryChannelCache};
pub use client::{TelegramClient, CHUNK_SIZE, MAX_FILE_SIZE};
pub use files::{FileRequest, FileResponse, RefetchRequest, TelegramFileService};
pub use message::{group_albums, MessageParser, NormalizedMessage};
pub use rate::RateController;
pub use session::{SessionError, SessionStore};

#[derive(Debug, Error)]
pub enum TelegramError {
    /// The server asked us to pause before retrying
    #[error("Flood wait: retry after {seconds}s")]
    FloodWait { seconds: u32 },

    #[error("Channel @{username} unavailable: {reason}")]
    ChannelUnavailable { username: String, reason: String },

    #[error("Telegram client is not connected")]
    NotConnected,

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Connect did not complete within {0:?}")]
    ConnectDeadline(Duration),

    #[error("File exceeds {limit} bytes")]
    FileTooLarge { limit: usize },

    #[error("Message {message_id} not found in chat {chat_id}")]
    MessageNotFound { chat_id: i64, message_id: i64 },

    #[error("Message has no downloadable media")]
    NoMedia,

    #[error("RPC error: {0}")]
    Rpc(String),
}

impl TelegramError {
    pub fn flood_wait_seconds(&self) -> Option<u32> {
        match self {
            TelegramError::FloodWait { seconds } => Some(*seconds),
            _ => None,
        }
    }
}
