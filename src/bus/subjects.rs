//! NATS subject names.

use crate::storage::SourceType;

pub const POSTS_NEW_SYNDICATION: &str = "posts.new.syndication";
pub const POSTS_NEW_WEB: &str = "posts.new.web";
pub const POSTS_NEW_CHANNEL: &str = "posts.new.channel";

pub const TELEGRAM_MEDIA_WARM: &str = "telegram.media.warm";
pub const TELEGRAM_GET_FILE: &str = "telegram.get_file";
pub const TELEGRAM_REFETCH_MESSAGE: &str = "telegram.refetch_message";
pub const TELEGRAM_TRIGGER_SYNC: &str = "telegram.trigger_sync";
pub const VALIDATION_VALIDATE_SOURCE: &str = "validation.validate_source";

/// JetStream stream capturing the post subjects.
pub const POSTS_STREAM: &str = "POSTS";
pub const POSTS_STREAM_SUBJECTS: &str = "posts.new.>";

/// Queue group shared by all harvester instances.
pub const QUEUE_GROUP: &str = "harvester";

/// Subject on which new posts of `source_type` are announced.
pub fn posts_subject(source_type: SourceType) -> Option<&'static str> {
    match source_type {
        SourceType::Syndication => Some(POSTS_NEW_SYNDICATION),
        SourceType::Web => Some(POSTS_NEW_WEB),
        SourceType::Channel => Some(POSTS_NEW_CHANNEL),
        SourceType::Video | SourceType::Forum => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posts_subject() {
        assert_eq!(posts_subject(SourceType::Web), Some("posts.new.web"));
        assert_eq!(posts_subject(SourceType::Forum), None);
    }
}
