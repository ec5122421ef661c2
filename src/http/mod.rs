mod cache;
mod client;
mod robots;

pub use cache::{ResponseCache, SWEEP_INTERVAL};
pub use client::{FetchError, FetchResponse, Fetcher, FetcherConfig};
pub(crate) use client::quota_for;
pub use robots::{RobotsPolicy, RobotsRules};
