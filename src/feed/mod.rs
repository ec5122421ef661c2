//! Syndication feeds and site discovery.
//!
//! - [`parser`] - RSS/Atom parsing into [`FeedItem`]s using `feed-rs`
//! - [`discovery`] - the ordered pipeline turning a site URL into article candidates
//! - [`sitemap`] - sitemap `<loc>` extraction used by discovery

pub mod discovery;
pub mod parser;
pub mod sitemap;

pub use discovery::{
    ArticleCandidate, DiscoveryContext, DiscoveryError, DiscoveryPipeline, DiscoveryResult,
    DiscoveryStep,
};
pub use parser::{parse_feed, FeedItem, FeedParseError, ParsedFeed};
