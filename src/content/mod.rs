//! Article body extraction for items whose feed body is too thin.

mod enricher;
pub mod readability;

pub use enricher::{ContentEnricher, DEFAULT_MIN_CONTENT_LENGTH};
pub use readability::Readable;
