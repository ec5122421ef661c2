//! Small helpers shared across the ingestion pipeline.
//!
//! - **Text**: control-character stripping, code-point truncation, whitespace
//!   collapsing for extracted article bodies
//! - **URLs**: relative URL resolution and host comparison used by discovery
//!   and the media extractor

mod text;
mod urls;

pub use text::{collapse_whitespace, first_line, strip_control_chars, truncate_chars};
pub use urls::{has_media_extension, host_of, resolve_url, same_host};
