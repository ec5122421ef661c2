//! Client for the external moderation classifier.
//!
//! Every failure path degrades to an ALLOW verdict so that ingestion never
//! blocks on the classifier.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ModerationConfig;
use crate::storage::{ModerationAction, ModerationVerdict, SourceType};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Body of `POST {base}/moderation/check`.
#[derive(Debug, Clone, Serialize)]
pub struct ModerationRequest<'a> {
    pub content_id: &'a str,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ModerationResponse {
    action: ModerationAction,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    block_reasons: Vec<String>,
    checked_at: Option<DateTime<Utc>>,
}

#[derive(Clone)]
pub struct ModerationClient {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl ModerationClient {
    /// Client for `base_url`; `None` disables classification (always ALLOW).
    pub fn new(base_url: Option<&str>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Failed to build moderation HTTP client, using defaults");
                reqwest::Client::new()
            });
        let endpoint = base_url
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(|b| format!("{}/moderation/check", b.trim_end_matches('/')));
        Self { client, endpoint }
    }

    pub fn from_config(config: &ModerationConfig) -> Self {
        Self::new(
            config.service_url.as_deref(),
            Duration::from_secs(config.timeout_seconds.max(1)),
        )
    }

    /// Always-ALLOW client.
    pub fn disabled() -> Self {
        Self::new(None, DEFAULT_TIMEOUT)
    }

    pub fn is_enabled(&self) -> bool {
        self.endpoint.is_some()
    }

    /// Classify one item. Never fails; errors yield [`ModerationVerdict::allow_now`].
    pub async fn check(&self, request: &ModerationRequest<'_>) -> ModerationVerdict {
        let Some(endpoint) = &self.endpoint else {
            return ModerationVerdict::allow_now();
        };

        match self.call(endpoint, request).await {
            Ok(verdict) => verdict,
            Err(reason) => {
                metrics::counter!("harvester_moderation_errors_total").increment(1);
                tracing::warn!(
                    content_id = %request.content_id,
                    error = %reason,
                    "Moderation check failed, allowing"
                );
                ModerationVerdict::allow_now()
            }
        }
    }

    async fn call(
        &self,
        endpoint: &str,
        request: &ModerationRequest<'_>,
    ) -> Result<ModerationVerdict, String> {
        let response = self
            .client
            .post(endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(format!("HTTP {}", status.as_u16()));
        }

        let body: ModerationResponse = response.json().await.map_err(|e| e.to_string())?;
        Ok(ModerationVerdict {
            action: body.action,
            labels: body.labels,
            block_reasons: body.block_reasons,
            checked_at: body.checked_at.unwrap_or_else(Utc::now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request<'a>() -> ModerationRequest<'a> {
        ModerationRequest {
            content_id: "abc",
            source_type: SourceType::Syndication,
            source_url: Some("https://example.com/a"),
            title: Some("Title"),
            text: "Body",
            published_at: None,
        }
    }

    #[tokio::test]
    async fn test_verdict_passthrough() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/moderation/check"))
            .and(body_partial_json(json!({"content_id": "abc", "source_type": "SYNDICATION"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "action": "FLAG",
                "labels": ["spam"],
                "block_reasons": [],
                "checked_at": "2025-01-01T00:00:00Z"
            })))
            .mount(&server)
            .await;

        let client = ModerationClient::new(Some(&server.uri()), DEFAULT_TIMEOUT);
        let verdict = client.check(&request()).await;
        assert_eq!(verdict.action, ModerationAction::Flag);
        assert_eq!(verdict.labels, vec!["spam"]);
        assert_eq!(verdict.checked_at.to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_server_error_allows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let before = Utc::now();
        let client = ModerationClient::new(Some(&server.uri()), DEFAULT_TIMEOUT);
        let verdict = client.check(&request()).await;
        assert_eq!(verdict.action, ModerationAction::Allow);
        assert!(verdict.labels.is_empty());
        assert!(verdict.checked_at >= before);
    }

    #[tokio::test]
    async fn test_malformed_body_allows() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = ModerationClient::new(Some(&server.uri()), DEFAULT_TIMEOUT);
        assert_eq!(client.check(&request()).await.action, ModerationAction::Allow);
    }

    #[tokio::test]
    async fn test_disabled_client_allows() {
        let client = ModerationClient::disabled();
        assert!(!client.is_enabled());
        assert_eq!(client.check(&request()).await.action, ModerationAction::Allow);
    }
}
