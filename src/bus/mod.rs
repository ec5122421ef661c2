//! NATS plumbing: durable post events and request/reply responders.

mod publisher;
mod server;
pub mod subjects;

pub use publisher::{
    EventPublisher, NatsPublisher, PostEvents, PublishError, PublishedMessage, RawPostCreated,
    RecordingPublisher, RAW_POST_CREATED,
};
pub use server::{
    serve, GetFileHandler, RefetchHandler, RequestHandler, TriggerSyncHandler, TriggerSyncReply,
    TriggerSyncRequest, ValidateHandler, WarmHandler, DEFAULT_BOOST_MINUTES,
};
