//! Handlers behind the `telegram.get_file` and `telegram.refetch_message`
//! subjects.
//!
//! File references expire, so every download re-fetches the owning message
//! first and downloads from the fresh location.

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::api::{FileLocation, RawMedia, RawMessage};
use super::client::TelegramClient;
use super::message::{MessageParser, NormalizedMessage};
use super::TelegramError;
use crate::media::{FileSource, WarmError};

const THUMB_PREFIX: &str = "thumb_";
const THUMB_MIME: &str = "image/jpeg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRequest {
    pub file_id: String,
    pub file_type: String,
    pub chat_id: i64,
    pub msg_id: i64,
}

/// Reply of `telegram.get_file`: either the base64 payload or an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileResponse {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefetchRequest {
    pub chat_id: i64,
    pub message_id: i64,
}

/// A downloaded file with its content type.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadedFile {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

pub struct TelegramFileService {
    client: Arc<TelegramClient>,
    parser: MessageParser,
}

impl TelegramFileService {
    pub fn new(client: Arc<TelegramClient>, parser: MessageParser) -> Self {
        Self { client, parser }
    }

    async fn fetch_message(&self, chat_id: i64, message_id: i64) -> Result<RawMessage, TelegramError> {
        if !self.client.is_connected() {
            return Err(TelegramError::NotConnected);
        }
        let peer = self.client.peer_for_chat(chat_id).await?;
        self.client.get_message(&peer, message_id).await
    }

    /// Download the photo, document or document thumbnail named by `request`.
    pub async fn download(&self, request: &FileRequest) -> Result<DownloadedFile, TelegramError> {
        let message = self.fetch_message(request.chat_id, request.msg_id).await?;
        let want_thumb = request.file_id.starts_with(THUMB_PREFIX);
        let (location, mime_type) = file_location(&message, want_thumb)?;
        let bytes = self.client.download_file(&location).await?;
        tracing::debug!(
            file_id = %request.file_id,
            chat_id = request.chat_id,
            bytes = bytes.len(),
            "Downloaded Telegram file"
        );
        Ok(DownloadedFile { bytes, mime_type })
    }

    /// `telegram.get_file` reply for `request`.
    pub async fn handle_get_file(&self, request: &FileRequest) -> FileResponse {
        match self.download(request).await {
            Ok(file) => FileResponse {
                size: Some(file.bytes.len()),
                data: Some(base64::engine::general_purpose::STANDARD.encode(&file.bytes)),
                mime_type: Some(file.mime_type),
                error: None,
            },
            Err(e) => {
                tracing::warn!(file_id = %request.file_id, error = %e, "get_file failed");
                FileResponse::error(e.to_string())
            }
        }
    }

    /// Re-read one message and normalize it.
    pub async fn refetch(&self, request: &RefetchRequest) -> Result<NormalizedMessage, TelegramError> {
        let message = self.fetch_message(request.chat_id, request.message_id).await?;
        let channel_id = self.client.bare_channel_id(request.chat_id)?;
        Ok(self.parser.normalize(&message, channel_id))
    }
}

#[async_trait]
impl FileSource for TelegramFileService {
    async fn get_file(&self, request: &FileRequest) -> Result<FileResponse, WarmError> {
        Ok(self.handle_get_file(request).await)
    }
}

fn file_location(
    message: &RawMessage,
    want_thumb: bool,
) -> Result<(FileLocation, String), TelegramError> {
    match &message.media {
        Some(RawMedia::Photo(photo)) => {
            let size_kind = photo
                .largest()
                .map(|s| s.kind.clone())
                .ok_or(TelegramError::NoMedia)?;
            Ok((
                FileLocation::Photo {
                    id: photo.id,
                    access_hash: photo.access_hash,
                    file_reference: photo.file_reference.clone(),
                    size_kind,
                },
                THUMB_MIME.to_string(),
            ))
        }
        Some(RawMedia::Document(doc)) => {
            let (thumb_kind, mime) = if want_thumb {
                let kind = doc.thumbs.last().cloned().ok_or(TelegramError::NoMedia)?;
                (kind, THUMB_MIME.to_string())
            } else {
                (String::new(), doc.mime_type.clone())
            };
            Ok((
                FileLocation::Document {
                    id: doc.id,
                    access_hash: doc.access_hash,
                    file_reference: doc.file_reference.clone(),
                    thumb_kind,
                },
                mime,
            ))
        }
        None => Err(TelegramError::NoMedia),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::api::{RawDocument, RawPhoto, PhotoSize};

    fn doc_message(thumbs: Vec<String>) -> RawMessage {
        RawMessage {
            id: 1,
            date: 0,
            text: String::new(),
            grouped_id: None,
            media: Some(RawMedia::Document(RawDocument {
                id: 10,
                access_hash: 20,
                file_reference: vec![9],
                mime_type: "video/mp4".into(),
                size: 100,
                attributes: Vec::new(),
                thumbs,
            })),
        }
    }

    #[test]
    fn test_document_location() {
        let (loc, mime) = file_location(&doc_message(vec!["s".into(), "m".into()]), false).unwrap();
        assert_eq!(mime, "video/mp4");
        assert!(matches!(loc, FileLocation::Document { ref thumb_kind, .. } if thumb_kind.is_empty()));

        let (loc, mime) = file_location(&doc_message(vec!["s".into(), "m".into()]), true).unwrap();
        assert_eq!(mime, "image/jpeg");
        assert!(matches!(loc, FileLocation::Document { ref thumb_kind, .. } if thumb_kind == "m"));
    }

    #[test]
    fn test_thumb_without_thumbnails() {
        assert!(matches!(
            file_location(&doc_message(Vec::new()), true),
            Err(TelegramError::NoMedia)
        ));
    }

    #[test]
    fn test_photo_location_uses_largest() {
        let message = RawMessage {
            id: 1,
            date: 0,
            text: String::new(),
            grouped_id: None,
            media: Some(RawMedia::Photo(RawPhoto {
                id: 1,
                access_hash: 2,
                file_reference: Vec::new(),
                sizes: vec![
                    PhotoSize { kind: "m".into(), width: 320, height: 200 },
                    PhotoSize { kind: "w".into(), width: 2560, height: 1600 },
                ],
            })),
        };
        let (loc, _) = file_location(&message, false).unwrap();
        assert!(matches!(loc, FileLocation::Photo { ref size_kind, .. } if size_kind == "w"));
    }

    #[test]
    fn test_response_error_shape() {
        let json = serde_json::to_value(FileResponse::error("boom")).unwrap();
        assert_eq!(json, serde_json::json!({"error": "boom"}));
    }
}
