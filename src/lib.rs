//! Multi-source content ingestion: syndication feeds, web pages and Telegram
//! channels are polled on tiered schedules, deduplicated, moderated, stored
//! and announced on NATS.

pub mod bus;
pub mod config;
pub mod content;
pub mod feed;
pub mod http;
pub mod media;
pub mod moderation;
pub mod poller;
pub mod storage;
pub mod telegram;
pub mod util;
pub mod validation;
