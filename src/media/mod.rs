//! Media handling: URL extraction from HTML, the Telegram media URL grammar,
//! and the object-store warmer.

mod extractor;
mod url;
pub mod warmer;

pub use extractor::{filename_key, quality_priority, MediaExtractor};
pub use self::url::{build_media_url, media_kind_for_url, parse_media_url, MediaRef};
pub use warmer::{
    FileSource, MediaWarmer, NatsFileSource, WarmError, WarmMediaObject, WarmReply, WarmRequest,
    WarmerConfig,
};
