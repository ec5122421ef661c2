//! [`TelegramApi`] backed by the grammers MTProto client.
//!
//! Only raw TL functions are used so the adapter stays a thin mapping layer
//! between grammers' types and the library-neutral ones in [`super::api`].

use async_trait::async_trait;
use grammers_client::{Client, Config, InitParams};
use grammers_mtsender::InvocationError;
use grammers_session::Session;
use grammers_tl_types as tl;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;

use super::api::{
    unmark_channel_id, ChannelPeer, DocumentAttribute, FileLocation, PhotoSize, RawDocument,
    RawMedia, RawMessage, RawPhoto, TelegramApi, TelegramConnector,
};
use super::TelegramError;

/// Opens grammers clients from a stored session blob.
pub struct GrammersConnector {
    api_id: i32,
    api_hash: SecretString,
}

impl GrammersConnector {
    pub fn new(api_id: i32, api_hash: SecretString) -> Self {
        Self { api_id, api_hash }
    }
}

#[async_trait]
impl TelegramConnector for GrammersConnector {
    async fn connect(&self, session: Vec<u8>) -> Result<Arc<dyn TelegramApi>, TelegramError> {
        let session = Session::load(&session)
            .map_err(|e| TelegramError::Rpc(format!("corrupt session: {e}")))?;

        let client = Client::connect(Config {
            session,
            api_id: self.api_id,
            api_hash: self.api_hash.expose_secret().to_string(),
            params: InitParams::default(),
        })
        .await
        .map_err(|e| TelegramError::Rpc(e.to_string()))?;

        let authorized = client.is_authorized().await.map_err(map_invocation)?;
        if !authorized {
            return Err(TelegramError::Rpc("session is not authorized".to_string()));
        }
        Ok(Arc::new(GrammersApi { client }))
    }
}

pub struct GrammersApi {
    client: Client,
}

#[async_trait]
impl TelegramApi for GrammersApi {
    async fn resolve_username(&self, username: &str) -> Result<ChannelPeer, TelegramError> {
        let resolved = self
            .client
            .invoke(&tl::functions::contacts::ResolveUsername {
                username: username.to_string(),
            })
            .await
            .map_err(map_invocation)?;
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) = resolved;

        resolved
            .chats
            .into_iter()
            .find_map(|chat| match chat {
                tl::enums::Chat::Channel(channel) => Some(ChannelPeer {
                    channel_id: channel.id,
                    access_hash: channel.access_hash.unwrap_or_default(),
                    title: channel.title,
                    username: channel.username,
                }),
                _ => None,
            })
            .ok_or_else(|| TelegramError::ChannelUnavailable {
                username: username.to_string(),
                reason: "not a channel".to_string(),
            })
    }

    async fn get_history(
        &self,
        peer: &ChannelPeer,
        limit: i32,
        offset_id: i32,
    ) -> Result<Vec<RawMessage>, TelegramError> {
        let messages = self
            .client
            .invoke(&tl::functions::messages::GetHistory {
                peer: input_peer(peer),
                offset_id,
                offset_date: 0,
                add_offset: 0,
                limit,
                max_id: 0,
                min_id: 0,
                hash: 0,
            })
            .await
            .map_err(map_invocation)?;
        Ok(convert_messages(messages))
    }

    async fn get_messages(
        &self,
        peer: &ChannelPeer,
        ids: &[i32],
    ) -> Result<Vec<RawMessage>, TelegramError> {
        let messages = self
            .client
            .invoke(&tl::functions::channels::GetMessages {
                channel: tl::enums::InputChannel::Channel(tl::types::InputChannel {
                    channel_id: peer.channel_id,
                    access_hash: peer.access_hash,
                }),
                id: ids
                    .iter()
                    .map(|&id| tl::enums::InputMessage::Id(tl::types::InputMessageId { id }))
                    .collect(),
            })
            .await
            .map_err(map_invocation)?;
        Ok(convert_messages(messages))
    }

    async fn get_file_chunk(
        &self,
        location: &FileLocation,
        offset: i64,
        limit: i32,
    ) -> Result<Vec<u8>, TelegramError> {
        let file = self
            .client
            .invoke(&tl::functions::upload::GetFile {
                precise: false,
                cdn_supported: false,
                location: input_location(location),
                offset,
                limit,
            })
            .await
            .map_err(map_invocation)?;
        match file {
            tl::enums::upload::File::File(file) => Ok(file.bytes),
            tl::enums::upload::File::CdnRedirect(_) => {
                Err(TelegramError::Rpc("file served from CDN".to_string()))
            }
        }
    }

    fn bare_channel_id(&self, chat_id: i64) -> i64 {
        unmark_channel_id(chat_id)
    }

    fn session_blob(&self) -> Option<Vec<u8>> {
        Some(self.client.session().save())
    }
}

fn map_invocation(error: InvocationError) -> TelegramError {
    match error {
        InvocationError::Rpc(rpc) if rpc.name == "FLOOD_WAIT" => TelegramError::FloodWait {
            seconds: rpc.value.unwrap_or(0),
        },
        InvocationError::Rpc(rpc)
            if matches!(
                rpc.name.as_str(),
                "CHANNEL_PRIVATE" | "CHANNEL_INVALID" | "USERNAME_NOT_OCCUPIED" | "USERNAME_INVALID"
            ) =>
        {
            TelegramError::ChannelUnavailable {
                username: String::new(),
                reason: rpc.name,
            }
        }
        other => TelegramError::Rpc(other.to_string()),
    }
}

fn input_peer(peer: &ChannelPeer) -> tl::enums::InputPeer {
    tl::enums::InputPeer::Channel(tl::types::InputPeerChannel {
        channel_id: peer.channel_id,
        access_hash: peer.access_hash,
    })
}

fn input_location(location: &FileLocation) -> tl::enums::InputFileLocation {
    match location {
        FileLocation::Photo {
            id,
            access_hash,
            file_reference,
            size_kind,
        } => tl::enums::InputFileLocation::InputPhotoFileLocation(
            tl::types::InputPhotoFileLocation {
                id: *id,
                access_hash: *access_hash,
                file_reference: file_reference.clone(),
                thumb_size: size_kind.clone(),
            },
        ),
        FileLocation::Document {
            id,
            access_hash,
            file_reference,
            thumb_kind,
        } => tl::enums::InputFileLocation::InputDocumentFileLocation(
            tl::types::InputDocumentFileLocation {
                id: *id,
                access_hash: *access_hash,
                file_reference: file_reference.clone(),
                thumb_size: thumb_kind.clone(),
            },
        ),
    }
}

// ============================================================================
// TL → neutral types
// ============================================================================

fn convert_messages(messages: tl::enums::messages::Messages) -> Vec<RawMessage> {
    let list = match messages {
        tl::enums::messages::Messages::Messages(m) => m.messages,
        tl::enums::messages::Messages::Slice(m) => m.messages,
        tl::enums::messages::Messages::ChannelMessages(m) => m.messages,
        tl::enums::messages::Messages::NotModified(_) => Vec::new(),
    };
    list.into_iter().filter_map(convert_message).collect()
}

fn convert_message(message: tl::enums::Message) -> Option<RawMessage> {
    let tl::enums::Message::Message(message) = message else {
        return None;
    };
    Some(RawMessage {
        id: message.id,
        date: i64::from(message.date),
        text: message.message,
        grouped_id: message.grouped_id,
        media: message.media.and_then(convert_media),
    })
}

fn convert_media(media: tl::enums::MessageMedia) -> Option<RawMedia> {
    match media {
        tl::enums::MessageMedia::Photo(photo) => match photo.photo? {
            tl::enums::Photo::Photo(photo) => Some(RawMedia::Photo(RawPhoto {
                id: photo.id,
                access_hash: photo.access_hash,
                file_reference: photo.file_reference,
                sizes: photo.sizes.into_iter().filter_map(convert_size).collect(),
            })),
            tl::enums::Photo::Empty(_) => None,
        },
        tl::enums::MessageMedia::Document(doc) => match doc.document? {
            tl::enums::Document::Document(doc) => Some(RawMedia::Document(RawDocument {
                id: doc.id,
                access_hash: doc.access_hash,
                file_reference: doc.file_reference,
                mime_type: doc.mime_type,
                size: doc.size,
                attributes: doc.attributes.into_iter().map(convert_attribute).collect(),
                thumbs: doc
                    .thumbs
                    .unwrap_or_default()
                    .into_iter()
                    .filter_map(convert_size)
                    .map(|s| s.kind)
                    .collect(),
            })),
            tl::enums::Document::Empty(_) => None,
        },
        _ => None,
    }
}

/// Downloadable sizes only; stripped and cached previews are inline data.
fn convert_size(size: tl::enums::PhotoSize) -> Option<PhotoSize> {
    match size {
        tl::enums::PhotoSize::Size(s) => Some(PhotoSize {
            kind: s.r#type,
            width: s.w,
            height: s.h,
        }),
        tl::enums::PhotoSize::Progressive(s) => Some(PhotoSize {
            kind: s.r#type,
            width: s.w,
            height: s.h,
        }),
        _ => None,
    }
}

fn convert_attribute(attribute: tl::enums::DocumentAttribute) -> DocumentAttribute {
    match attribute {
        tl::enums::DocumentAttribute::Video(v) => DocumentAttribute::Video {
            width: v.w,
            height: v.h,
            duration: v.duration,
        },
        tl::enums::DocumentAttribute::Animated => DocumentAttribute::Animated,
        tl::enums::DocumentAttribute::Filename(f) => DocumentAttribute::Filename(f.file_name),
        _ => DocumentAttribute::Other,
    }
}
