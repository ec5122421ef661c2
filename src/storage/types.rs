use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Errors surfaced by the repository layer.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Driver-level failure (connection, constraint, statement)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A JSON column could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored enum column held an unknown value
    #[error("Invalid column value for {column}: {value}")]
    InvalidValue { column: &'static str, value: String },

    /// No source with the given ID
    #[error("Source not found: {0}")]
    SourceNotFound(Uuid),

    /// A unique code was inserted twice inside one batch or already existed
    #[error("Duplicate unique code: {0}")]
    Duplicate(String),
}

// ============================================================================
// Source Classification
// ============================================================================

/// Type tag of a raw feed. Determines which endpoint fields are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceType {
    Syndication,
    Web,
    Channel,
    Video,
    Forum,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::Syndication => "SYNDICATION",
            SourceType::Web => "WEB",
            SourceType::Channel => "CHANNEL",
            SourceType::Video => "VIDEO",
            SourceType::Forum => "FORUM",
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SYNDICATION" | "RSS" => Ok(SourceType::Syndication),
            "WEB" => Ok(SourceType::Web),
            "CHANNEL" | "TELEGRAM" => Ok(SourceType::Channel),
            "VIDEO" => Ok(SourceType::Video),
            "FORUM" => Ok(SourceType::Forum),
            _ => Err(StorageError::InvalidValue {
                column: "type",
                value: s.to_owned(),
            }),
        }
    }
}

/// Polling tier: freshness class that selects a source's cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Hot,
    Warm,
    Cold,
    Quarantine,
}

impl Tier {
    /// Every tier in scheduling order.
    pub const ALL: [Tier; 4] = [Tier::Hot, Tier::Warm, Tier::Cold, Tier::Quarantine];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Hot => "HOT",
            Tier::Warm => "WARM",
            Tier::Cold => "COLD",
            Tier::Quarantine => "QUARANTINE",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "HOT" => Ok(Tier::Hot),
            "WARM" => Ok(Tier::Warm),
            "COLD" => Ok(Tier::Cold),
            "QUARANTINE" => Ok(Tier::Quarantine),
            _ => Err(StorageError::InvalidValue {
                column: "polling_tier",
                value: s.to_owned(),
            }),
        }
    }
}

/// Consecutive errors after which a source is moved to QUARANTINE.
pub const QUARANTINE_ERROR_THRESHOLD: i32 = 5;

/// Per-family cadence, in seconds, for each tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierIntervals {
    pub hot: u64,
    pub warm: u64,
    pub cold: u64,
    pub quarantine: u64,
}

impl TierIntervals {
    pub const fn syndication() -> Self {
        Self {
            hot: 300,
            warm: 600,
            cold: 3600,
            quarantine: 14400,
        }
    }

    pub const fn web() -> Self {
        Self {
            hot: 600,
            warm: 1800,
            cold: 7200,
            quarantine: 28800,
        }
    }

    pub const fn channel() -> Self {
        Self {
            hot: 30,
            warm: 120,
            cold: 600,
            quarantine: 3600,
        }
    }

    pub fn seconds(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Hot => self.hot,
            Tier::Warm => self.warm,
            Tier::Cold => self.cold,
            Tier::Quarantine => self.quarantine,
        }
    }

    pub fn interval(&self, tier: Tier) -> Duration {
        Duration::from_secs(self.seconds(tier))
    }
}

// ============================================================================
// Source (raw feed)
// ============================================================================

/// Long-lived descriptor of something to poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub id: Uuid,
    pub source_type: SourceType,
    pub name: Option<String>,
    pub feed_url: Option<String>,
    pub site_url: Option<String>,
    pub telegram_channel_id: Option<i64>,
    pub telegram_username: Option<String>,
    /// Discovery step name that last produced candidates (WEB only)
    pub discovery_method: Option<String>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_execution: Option<DateTime<Utc>>,
    /// Largest channel message ID seen, stored as text
    pub last_message_id: Option<String>,
    pub error_count: i32,
    pub last_error: Option<String>,
    pub tier: Tier,
    pub priority_boost_until: Option<DateTime<Utc>>,
    pub last_flood_wait_at: Option<DateTime<Utc>>,
}

impl Source {
    /// A fresh source with empty scheduling state, stored tier COLD.
    pub fn new(source_type: SourceType) -> Self {
        Self {
            id: Uuid::now_v7(),
            source_type,
            name: None,
            feed_url: None,
            site_url: None,
            telegram_channel_id: None,
            telegram_username: None,
            discovery_method: None,
            last_polled_at: None,
            last_success_at: None,
            last_execution: None,
            last_message_id: None,
            error_count: 0,
            last_error: None,
            tier: Tier::Cold,
            priority_boost_until: None,
            last_flood_wait_at: None,
        }
    }

    /// HOT while a priority boost is active, the stored tier otherwise.
    pub fn effective_tier(&self, now: DateTime<Utc>) -> Tier {
        match self.priority_boost_until {
            Some(until) if until > now => Tier::Hot,
            _ => self.tier,
        }
    }

    /// Human-facing identifier carried in published events.
    pub fn identifier(&self) -> String {
        match self.source_type {
            SourceType::Channel => match &self.telegram_username {
                Some(name) => format!("@{}", name.trim_start_matches('@')),
                None => self
                    .telegram_channel_id
                    .map(|id| id.to_string())
                    .unwrap_or_default(),
            },
            SourceType::Web => self
                .site_url
                .clone()
                .or_else(|| self.feed_url.clone())
                .unwrap_or_default(),
            _ => self
                .feed_url
                .clone()
                .or_else(|| self.site_url.clone())
                .unwrap_or_default(),
        }
    }

    /// Whether this source has never completed a poll.
    ///
    /// WEB sources key off `last_polled_at`; the other families use
    /// `last_execution`.
    pub fn is_first_run(&self) -> bool {
        match self.source_type {
            SourceType::Web => self.last_polled_at.is_none(),
            _ => self.last_execution.is_none(),
        }
    }

    /// Parsed channel cursor, `0` when absent or malformed.
    pub fn last_message_cursor(&self) -> i32 {
        self.last_message_id
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0)
    }
}

// ============================================================================
// Posts
// ============================================================================

/// Kind of a media attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
    Document,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Animation => "animation",
            MediaKind::Document => "document",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "photo" => Ok(MediaKind::Photo),
            "video" => Ok(MediaKind::Video),
            "animation" => Ok(MediaKind::Animation),
            "document" => Ok(MediaKind::Document),
            _ => Err(StorageError::InvalidValue {
                column: "media.type",
                value: s.to_owned(),
            }),
        }
    }
}

/// One media attachment of a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaObject {
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl MediaObject {
    pub fn new(kind: MediaKind, url: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.into(),
            preview_url: None,
            width: None,
            height: None,
            duration: None,
        }
    }
}

/// Moderation decision for a post.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ModerationAction {
    Allow,
    Block,
    Flag,
}

impl ModerationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ModerationAction::Allow => "ALLOW",
            ModerationAction::Block => "BLOCK",
            ModerationAction::Flag => "FLAG",
        }
    }
}

impl FromStr for ModerationAction {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(ModerationAction::Allow),
            "BLOCK" => Ok(ModerationAction::Block),
            "FLAG" => Ok(ModerationAction::Flag),
            _ => Err(StorageError::InvalidValue {
                column: "moderation_action",
                value: s.to_owned(),
            }),
        }
    }
}

/// Classifier verdict carried onto the stored post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationVerdict {
    pub action: ModerationAction,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub block_reasons: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl ModerationVerdict {
    /// Fail-open verdict: ALLOW, no labels, checked now.
    pub fn allow_now() -> Self {
        Self {
            action: ModerationAction::Allow,
            labels: Vec::new(),
            block_reasons: Vec::new(),
            checked_at: Utc::now(),
        }
    }
}

/// A normalized item ready for dedup, moderation and insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub raw_feed_id: Uuid,
    pub unique_code: String,
    pub content: String,
    pub title: Option<String>,
    pub media: Vec<MediaObject>,
    pub source_url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub telegram_message_id: Option<i64>,
    pub media_group_id: Option<i64>,
    pub moderation: Option<ModerationVerdict>,
}

/// A stored raw post.
#[derive(Debug, Clone, PartialEq)]
pub struct Post {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub post: NewPost,
}
