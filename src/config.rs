//! Configuration for the ingestion engine.
//!
//! Values come from three layers, later layers winning:
//!
//! 1. Built-in defaults (`Config::default()`)
//! 2. An optional TOML file (`--config path`); a missing file is not an error
//! 3. Environment variables (`DATABASE_URL`, `RSS_*`, `TELEGRAM_*`, ...)
//!
//! Unknown TOML sections and unknown environment variables are ignored, the
//! former with a warning.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use crate::storage::TierIntervals;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// Secrets (`telegram.api_hash`, `s3.secret_access_key`) are only read from
/// the environment and are redacted by `SecretString`'s `Debug` impl.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub nats: NatsConfig,
    pub rss: RssConfig,
    pub web: WebConfig,
    pub telegram: TelegramConfig,
    pub scraping: ScrapingConfig,
    pub http_cache: HttpCacheConfig,
    pub moderation: ModerationConfig,
    pub s3: S3Config,
    pub media_warming: MediaWarmingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_min: u32,
    pub pool_max: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_min: 2,
            pool_max: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub publish_enabled: bool,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            publish_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RssConfig {
    pub polling_enabled: bool,
    pub polling_interval_seconds: u64,
    pub concurrent_feeds: usize,
    /// Per-source poll budget in seconds
    pub feed_timeout: u64,
    pub initial_articles_count: usize,
    pub max_articles_per_request: usize,
    /// Enrich thin items by extracting the linked article
    pub fetch_full_content: bool,
    pub min_content_length: usize,
    pub tiers: TierIntervals,
}

impl Default for RssConfig {
    fn default() -> Self {
        Self {
            polling_enabled: true,
            polling_interval_seconds: 60,
            concurrent_feeds: 5,
            feed_timeout: 420,
            initial_articles_count: 10,
            max_articles_per_request: 20,
            fetch_full_content: false,
            min_content_length: 500,
            tiers: TierIntervals::syndication(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub polling_enabled: bool,
    pub polling_interval_seconds: u64,
    pub concurrent_sources: usize,
    pub feed_timeout: u64,
    pub initial_articles_count: usize,
    pub max_articles_per_request: usize,
    /// Re-run the media extractor on each article page
    pub fetch_article_media: bool,
    pub tiers: TierIntervals,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            polling_enabled: true,
            polling_interval_seconds: 300,
            concurrent_sources: 3,
            feed_timeout: 600,
            initial_articles_count: 10,
            max_articles_per_request: 20,
            fetch_article_media: true,
            tiers: TierIntervals::web(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub polling_enabled: bool,
    pub api_id: i32,
    #[serde(skip)]
    pub api_hash: Option<SecretString>,
    pub phone: Option<String>,
    pub workdir: PathBuf,
    pub session_name: String,
    pub polling_interval_seconds: u64,
    pub concurrent_channels: usize,
    pub max_messages: usize,
    pub initial_messages: usize,
    pub tiers: TierIntervals,
    pub flood_cooldown_seconds: u64,
    pub adaptive_rate_enabled: bool,
    pub max_multiplier: f64,
    pub base_delay_ms: u64,
    pub media_base_url: String,
    pub channel_cache_ttl_seconds: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            polling_enabled: true,
            api_id: 0,
            api_hash: None,
            phone: None,
            workdir: PathBuf::from("./data/telegram"),
            session_name: "harvester".to_string(),
            polling_interval_seconds: 30,
            concurrent_channels: 3,
            max_messages: 50,
            initial_messages: 10,
            tiers: TierIntervals::channel(),
            flood_cooldown_seconds: 300,
            adaptive_rate_enabled: true,
            max_multiplier: 5.0,
            base_delay_ms: 1000,
            media_base_url: "http://localhost:8080".to_string(),
            channel_cache_ttl_seconds: 86_400,
        }
    }
}

impl TelegramConfig {
    /// Path of the session blob: `{workdir}/{session_name}.session`.
    pub fn session_path(&self) -> PathBuf {
        self.workdir.join(format!("{}.session", self.session_name))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    pub requests_per_sec: f64,
    /// Per-request timeout in seconds
    pub timeout: u64,
    pub max_retries: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub respect_robots: bool,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: 0.5,
            timeout: 10,
            max_retries: 3,
            min_delay_ms: 1000,
            max_delay_ms: 3000,
            respect_robots: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpCacheConfig {
    pub enabled: bool,
    pub ttl_hours: u64,
    pub max_entries: usize,
}

impl Default for HttpCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_hours: 24,
            max_entries: 2048,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModerationConfig {
    /// Base URL; moderation is skipped (ALLOW) when unset
    pub service_url: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct S3Config {
    pub bucket: Option<String>,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub access_key_id: Option<String>,
    #[serde(skip)]
    pub secret_access_key: Option<SecretString>,
    pub allow_http: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MediaWarmingConfig {
    pub enabled: bool,
    pub requests_per_sec: u32,
    pub concurrency: usize,
    pub timeout_seconds: u64,
}

impl Default for MediaWarmingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_sec: 5,
            concurrency: 3,
            timeout_seconds: 120,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

const KNOWN_SECTIONS: [&str; 10] = [
    "database",
    "nats",
    "rss",
    "web",
    "telegram",
    "scraping",
    "http_cache",
    "moderation",
    "s3",
    "media_warming",
];

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from an optional TOML file, then apply the process
    /// environment on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)`
    /// - Unknown sections → accepted, logged as warning
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_SECTIONS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Unparseable values are logged and leave the previous value in place.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup: &lookup };

        env.string_opt("DATABASE_URL", &mut self.database.url);
        env.parse("DATABASE_POOL_MIN", &mut self.database.pool_min);
        env.parse("DATABASE_POOL_MAX", &mut self.database.pool_max);

        env.string("NATS_URL", &mut self.nats.url);
        env.flag("NATS_PUBLISH_ENABLED", &mut self.nats.publish_enabled);

        let rss = &mut self.rss;
        env.flag("RSS_POLLING_ENABLED", &mut rss.polling_enabled);
        env.parse("RSS_POLLING_INTERVAL_SECONDS", &mut rss.polling_interval_seconds);
        env.parse("RSS_CONCURRENT_FEEDS", &mut rss.concurrent_feeds);
        env.parse("RSS_FEED_TIMEOUT", &mut rss.feed_timeout);
        env.parse("RSS_INITIAL_ARTICLES_COUNT", &mut rss.initial_articles_count);
        env.parse("RSS_MAX_ARTICLES_PER_REQUEST", &mut rss.max_articles_per_request);
        env.flag("RSS_FETCH_FULL_CONTENT", &mut rss.fetch_full_content);
        env.parse("RSS_MIN_CONTENT_LENGTH", &mut rss.min_content_length);
        env.tiers("RSS", &mut rss.tiers);

        let web = &mut self.web;
        env.flag("WEB_POLLING_ENABLED", &mut web.polling_enabled);
        env.parse("WEB_POLLING_INTERVAL_SECONDS", &mut web.polling_interval_seconds);
        env.parse("WEB_CONCURRENT_SOURCES", &mut web.concurrent_sources);
        env.parse("WEB_FEED_TIMEOUT", &mut web.feed_timeout);
        env.parse("WEB_INITIAL_ARTICLES_COUNT", &mut web.initial_articles_count);
        env.parse("WEB_MAX_ARTICLES_PER_REQUEST", &mut web.max_articles_per_request);
        env.flag("WEB_FETCH_ARTICLE_MEDIA", &mut web.fetch_article_media);
        env.tiers("WEB", &mut web.tiers);

        let scraping = &mut self.scraping;
        env.parse("SCRAPING_REQUESTS_PER_SEC", &mut scraping.requests_per_sec);
        env.parse("SCRAPING_TIMEOUT", &mut scraping.timeout);
        env.parse("SCRAPING_MAX_RETRIES", &mut scraping.max_retries);
        env.parse("SCRAPING_MIN_DELAY_MS", &mut scraping.min_delay_ms);
        env.parse("SCRAPING_MAX_DELAY_MS", &mut scraping.max_delay_ms);
        env.flag("SCRAPING_RESPECT_ROBOTS", &mut scraping.respect_robots);

        env.flag("HTTP_CACHE_ENABLED", &mut self.http_cache.enabled);
        env.parse("HTTP_CACHE_TTL_HOURS", &mut self.http_cache.ttl_hours);

        env.string_opt("MODERATION_SERVICE_URL", &mut self.moderation.service_url);

        let tg = &mut self.telegram;
        env.flag("TELEGRAM_POLLING_ENABLED", &mut tg.polling_enabled);
        env.parse("TELEGRAM_API_ID", &mut tg.api_id);
        if let Some(hash) = env.get("TELEGRAM_API_HASH") {
            tg.api_hash = Some(SecretString::from(hash));
        }
        env.string_opt("TELEGRAM_PHONE", &mut tg.phone);
        env.parse("TELEGRAM_WORKDIR", &mut tg.workdir);
        env.string("TELEGRAM_SESSION_NAME", &mut tg.session_name);
        env.parse("TELEGRAM_POLLING_INTERVAL_SECONDS", &mut tg.polling_interval_seconds);
        env.parse("TELEGRAM_CONCURRENT_CHANNELS", &mut tg.concurrent_channels);
        env.parse("TELEGRAM_MAX_MESSAGES", &mut tg.max_messages);
        env.parse("TELEGRAM_INITIAL_MESSAGES", &mut tg.initial_messages);
        env.tiers("TELEGRAM", &mut tg.tiers);
        env.parse("TELEGRAM_FLOOD_COOLDOWN_SECONDS", &mut tg.flood_cooldown_seconds);
        env.flag("TELEGRAM_ADAPTIVE_RATE_ENABLED", &mut tg.adaptive_rate_enabled);
        env.parse("TELEGRAM_MAX_MULTIPLIER", &mut tg.max_multiplier);
        env.parse("TELEGRAM_BASE_DELAY_MS", &mut tg.base_delay_ms);
        env.string("TELEGRAM_MEDIA_BASE_URL", &mut tg.media_base_url);
        env.parse("TELEGRAM_CHANNEL_CACHE_TTL_SECONDS", &mut tg.channel_cache_ttl_seconds);

        let s3 = &mut self.s3;
        env.string_opt("S3_BUCKET", &mut s3.bucket);
        env.string_opt("S3_REGION", &mut s3.region);
        env.string_opt("S3_ENDPOINT", &mut s3.endpoint);
        env.string_opt("S3_ACCESS_KEY_ID", &mut s3.access_key_id);
        if let Some(secret) = env.get("S3_SECRET_ACCESS_KEY") {
            s3.secret_access_key = Some(SecretString::from(secret));
        }
        env.flag("S3_ALLOW_HTTP", &mut s3.allow_http);

        let mw = &mut self.media_warming;
        env.flag("MEDIA_WARMING_ENABLED", &mut mw.enabled);
        env.parse("MEDIA_WARMING_RPS", &mut mw.requests_per_sec);
        env.parse("MEDIA_WARMING_CONCURRENCY", &mut mw.concurrency);
        env.parse("MEDIA_WARMING_TIMEOUT_SECONDS", &mut mw.timeout_seconds);
    }

    /// Reject configurations the engines cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.as_deref().map_or(true, str::is_empty) {
            return Err(ConfigError::Invalid("DATABASE_URL is required".into()));
        }
        if self.scraping.requests_per_sec <= 0.0 {
            return Err(ConfigError::Invalid(
                "SCRAPING_REQUESTS_PER_SEC must be positive".into(),
            ));
        }
        if self.scraping.min_delay_ms > self.scraping.max_delay_ms {
            return Err(ConfigError::Invalid(
                "SCRAPING_MIN_DELAY_MS must not exceed SCRAPING_MAX_DELAY_MS".into(),
            ));
        }
        if self.media_warming.requests_per_sec == 0 || self.media_warming.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "MEDIA_WARMING_RPS and MEDIA_WARMING_CONCURRENCY must be positive".into(),
            ));
        }
        if self.telegram.max_multiplier < 1.0 {
            return Err(ConfigError::Invalid(
                "TELEGRAM_MAX_MULTIPLIER must be at least 1.0".into(),
            ));
        }
        Ok(())
    }

    pub fn scraping_timeout(&self) -> Duration {
        Duration::from_secs(self.scraping.timeout)
    }
}

/// Typed accessors over an environment lookup function.
struct EnvReader<'a, F: Fn(&str) -> Option<String>> {
    lookup: &'a F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(v) = self.get(key) {
            *target = v;
        }
    }

    fn string_opt(&self, key: &str, target: &mut Option<String>) {
        if let Some(v) = self.get(key) {
            *target = Some(v);
        }
    }

    fn parse<T: FromStr>(&self, key: &str, target: &mut T) {
        if let Some(v) = self.get(key) {
            match v.trim().parse::<T>() {
                Ok(parsed) => *target = parsed,
                Err(_) => tracing::warn!(key = %key, value = %v, "Unparseable environment value, ignoring"),
            }
        }
    }

    fn flag(&self, key: &str, target: &mut bool) {
        if let Some(v) = self.get(key) {
            match v.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => *target = true,
                "0" | "false" | "no" | "off" => *target = false,
                _ => tracing::warn!(key = %key, value = %v, "Unparseable boolean, ignoring"),
            }
        }
    }

    fn tiers(&self, prefix: &str, tiers: &mut TierIntervals) {
        self.parse(&format!("{prefix}_TIER_HOT_INTERVAL"), &mut tiers.hot);
        self.parse(&format!("{prefix}_TIER_WARM_INTERVAL"), &mut tiers.warm);
        self.parse(&format!("{prefix}_TIER_COLD_INTERVAL"), &mut tiers.cold);
        self.parse(
            &format!("{prefix}_TIER_QUARANTINE_INTERVAL"),
            &mut tiers.quarantine,
        );
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.database.pool_min, 2);
        assert_eq!(config.database.pool_max, 10);
        assert!(config.nats.publish_enabled);
        assert_eq!(config.rss.min_content_length, 500);
        assert_eq!(config.rss.tiers, TierIntervals::syndication());
        assert_eq!(config.web.tiers, TierIntervals::web());
        assert_eq!(config.telegram.tiers, TierIntervals::channel());
        assert_eq!(config.scraping.requests_per_sec, 0.5);
        assert_eq!(config.scraping.timeout, 10);
        assert_eq!(config.scraping.max_retries, 3);
        assert_eq!(config.http_cache.ttl_hours, 24);
        assert_eq!(config.media_warming.requests_per_sec, 5);
        assert_eq!(config.media_warming.concurrency, 3);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("DATABASE_URL", "postgres://localhost/test"),
            ("RSS_TIER_HOT_INTERVAL", "120"),
            ("RSS_FETCH_FULL_CONTENT", "true"),
            ("TELEGRAM_API_HASH", "deadbeef"),
            ("TELEGRAM_FLOOD_COOLDOWN_SECONDS", "900"),
            ("NATS_PUBLISH_ENABLED", "0"),
            ("SCRAPING_REQUESTS_PER_SEC", "2.5"),
        ]));

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://localhost/test")
        );
        assert_eq!(config.rss.tiers.hot, 120);
        assert_eq!(config.rss.tiers.warm, 600);
        assert!(config.rss.fetch_full_content);
        assert_eq!(
            config
                .telegram
                .api_hash
                .as_ref()
                .map(|s| s.expose_secret().to_string()),
            Some("deadbeef".to_string())
        );
        assert_eq!(config.telegram.flood_cooldown_seconds, 900);
        assert!(!config.nats.publish_enabled);
        assert_eq!(config.scraping.requests_per_sec, 2.5);
    }

    #[test]
    fn test_bad_env_value_keeps_previous() {
        let mut config = Config::default();
        config.apply_env(env(&[("RSS_CONCURRENT_FEEDS", "many")]));
        assert_eq!(config.rss.concurrent_feeds, 5);
    }

    #[test]
    fn test_validate_requires_database_url() {
        let config = Config::default();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.database.url = Some("postgres://x".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/harvester_test_nonexistent_config.toml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config.rss.concurrent_feeds, 5);
    }

    #[test]
    fn test_partial_file_uses_defaults_for_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[rss]
concurrent_feeds = 8

[telegram]
session_name = "bot"
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.rss.concurrent_feeds, 8);
        assert_eq!(config.rss.feed_timeout, 420);
        assert_eq!(config.telegram.session_name, "bot");
        assert!(config.telegram.session_path().ends_with("bot.session"));
    }

    #[test]
    fn test_unknown_sections_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[webhooks]\nurl = \"x\"\n").unwrap();
        assert!(Config::from_file(&path).is_ok());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut config = Config::default();
        config.apply_env(env(&[("S3_SECRET_ACCESS_KEY", "super-secret-key-12345")]));
        let debug_output = format!("{:?}", config);
        assert!(!debug_output.contains("super-secret-key-12345"));
    }
}
