//! `validation.validate_source`: checks that a prospective source URL yields
//! content before it is registered.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};

use crate::feed::{parse_feed, DiscoveryPipeline};
use crate::http::Fetcher;
use crate::telegram::TelegramClient;

static USERNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]{3,31}$").expect("valid regex"));

const CHANNEL_HOSTS: [&str; 4] = ["t.me/", "telegram.me/", "www.t.me/", "www.telegram.me/"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    pub url: String,
    #[serde(default)]
    pub source_type: String,
    #[serde(default)]
    pub lightweight: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidateReply {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Discovery step that found content (web only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidateReply {
    fn ok(title: Option<String>) -> Self {
        Self {
            valid: true,
            title,
            ..Default::default()
        }
    }

    fn invalid(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Channel,
    Syndication,
    Web,
}

impl Kind {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "channel" | "telegram" => Kind::Channel,
            "syndication" | "rss" => Kind::Syndication,
            _ => Kind::Web,
        }
    }
}

pub struct SourceValidator {
    fetcher: Fetcher,
    discovery: Arc<DiscoveryPipeline>,
    telegram: Option<Arc<TelegramClient>>,
}

impl SourceValidator {
    pub fn new(
        fetcher: Fetcher,
        discovery: Arc<DiscoveryPipeline>,
        telegram: Option<Arc<TelegramClient>>,
    ) -> Self {
        Self {
            fetcher,
            discovery,
            telegram,
        }
    }

    pub async fn validate(&self, request: &ValidateRequest) -> ValidateReply {
        let url = request.url.trim();
        if url.is_empty() {
            return ValidateReply::invalid("url is required");
        }

        let reply = match Kind::parse(&request.source_type) {
            Kind::Channel => self.validate_channel(url).await,
            Kind::Syndication if request.lightweight => self.head_ok(url).await,
            Kind::Syndication => self.validate_feed(url).await,
            Kind::Web if request.lightweight => self.head_ok(url).await,
            Kind::Web => self.validate_web(url).await,
        };
        tracing::debug!(
            url = %url,
            source_type = %request.source_type,
            valid = reply.valid,
            "Validated source"
        );
        reply
    }

    async fn validate_channel(&self, url: &str) -> ValidateReply {
        let Some(client) = self.telegram.as_ref().filter(|c| c.is_connected()) else {
            return ValidateReply::invalid("telegram client not connected");
        };
        let Some(username) = extract_username(url) else {
            return ValidateReply::invalid(format!("not a channel URL: {url}"));
        };
        match client.get_channel_info(&username).await {
            Ok(peer) => ValidateReply::ok(Some(peer.title)),
            Err(e) => ValidateReply::invalid(e.to_string()),
        }
    }

    async fn head_ok(&self, url: &str) -> ValidateReply {
        match self.fetcher.head(url).await {
            Ok(resp) if resp.is_ok() => ValidateReply::ok(None),
            Ok(resp) => ValidateReply::invalid(format!("HTTP {}", resp.status)),
            Err(e) => ValidateReply::invalid(e.to_string()),
        }
    }

    async fn validate_feed(&self, url: &str) -> ValidateReply {
        let resp = match self.fetcher.get(url).await {
            Ok(resp) if resp.is_ok() => resp,
            Ok(resp) => return ValidateReply::invalid(format!("HTTP {}", resp.status)),
            Err(e) => return ValidateReply::invalid(e.to_string()),
        };
        match parse_feed(&resp.body) {
            Ok(feed) if !feed.items.is_empty() => ValidateReply::ok(feed.title),
            Ok(_) => ValidateReply::invalid("feed has no items"),
            Err(e) => ValidateReply::invalid(e.to_string()),
        }
    }

    async fn validate_web(&self, url: &str) -> ValidateReply {
        match self.discovery.discover(url, 1, None).await {
            Ok(result) if !result.articles.is_empty() => ValidateReply {
                valid: true,
                title: result.articles[0].title.clone(),
                discovery_method: Some(result.source_type),
                error: None,
            },
            Ok(_) => ValidateReply::invalid("no articles discovered"),
            Err(e) => ValidateReply::invalid(e.to_string()),
        }
    }
}

/// Channel username from `t.me/name`, `telegram.me/name`, `@name` or `name`.
pub fn extract_username(input: &str) -> Option<String> {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);

    let candidate = if let Some(rest) = CHANNEL_HOSTS
        .iter()
        .find_map(|host| without_scheme.strip_prefix(host))
    {
        let rest = rest.strip_prefix("s/").unwrap_or(rest);
        rest.split(['/', '?', '#']).next().unwrap_or("")
    } else if let Some(name) = trimmed.strip_prefix('@') {
        name
    } else if without_scheme.contains('/') || without_scheme.contains('.') {
        return None;
    } else {
        trimmed
    };

    USERNAME
        .is_match(candidate)
        .then(|| candidate.to_string())
}
