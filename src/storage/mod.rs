mod memory;
mod posts;
mod repository;
mod schema;
mod sources;
mod types;

pub use memory::MemoryRepository;
pub use repository::{ChannelPollUpdate, Repository, DUE_BATCH_LIMIT};
pub use schema::PgRepository;
pub use types::{
    MediaKind, MediaObject, ModerationAction, ModerationVerdict, NewPost, Post, Source,
    SourceType, StorageError, Tier, TierIntervals, QUARANTINE_ERROR_THRESHOLD,
};
