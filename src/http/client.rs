use bytes::Bytes;
use futures::StreamExt;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::Rng;
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use super::cache::ResponseCache;
use crate::config::Config;

const MAX_BODY_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Desktop browser identities rotated per request.
const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    "Mozilla/5.0 (X11; Linux x86_64; rv:125.0) Gecko/20100101 Firefox/125.0",
];

/// Errors that can occur while fetching a URL.
///
/// Non-2xx statuses are NOT errors: they are returned in [`FetchResponse`]
/// and callers decide what to do with them.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// The URL could not be parsed or has no host
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Response body exceeded the 10MB size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
}

impl FetchError {
    /// Transient failures are retried with backoff.
    fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Network(_) | FetchError::Timeout | FetchError::IncompleteResponse { .. }
        )
    }
}

/// Response of a GET or HEAD.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Bytes,
    pub headers: HeaderMap,
    pub from_cache: bool,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    }
}

/// Tunables for [`Fetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub requests_per_sec: f64,
    pub burst: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    /// First backoff step; doubles per retry (1s, 2s, 4s by default)
    pub retry_base: Duration,
    pub timeout: Duration,
    pub cache_ttl: Option<Duration>,
    pub cache_capacity: usize,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            requests_per_sec: 0.5,
            burst: 1,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            max_retries: 3,
            retry_base: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            cache_ttl: None,
            cache_capacity: 2048,
        }
    }
}

impl FetcherConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            requests_per_sec: config.scraping.requests_per_sec,
            burst: 1,
            min_delay: Duration::from_millis(config.scraping.min_delay_ms),
            max_delay: Duration::from_millis(config.scraping.max_delay_ms),
            max_retries: config.scraping.max_retries,
            retry_base: Duration::from_secs(1),
            timeout: config.scraping_timeout(),
            cache_ttl: config
                .http_cache
                .enabled
                .then(|| Duration::from_secs(config.http_cache.ttl_hours * 3600)),
            cache_capacity: config.http_cache.max_entries,
        }
    }

    /// No throttling, no jitter, millisecond backoff. For tests against local mocks.
    pub fn unthrottled() -> Self {
        Self {
            requests_per_sec: 1000.0,
            burst: 1000,
            min_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            max_retries: 2,
            retry_base: Duration::from_millis(10),
            timeout: Duration::from_secs(5),
            cache_ttl: None,
            cache_capacity: 64,
        }
    }
}

/// Domain-throttled HTTP client with retry, jitter, UA rotation and an
/// optional response cache.
///
/// Cheap to clone; all clones share the limiter map and cache.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<FetcherInner>,
}

struct FetcherInner {
    client: reqwest::Client,
    config: FetcherConfig,
    limiters: RwLock<HashMap<String, Arc<DefaultDirectRateLimiter>>>,
    cache: Option<Arc<ResponseCache>>,
}

impl Fetcher {
    pub fn new(config: FetcherConfig) -> Result<Self, FetchError> {
        // gzip/deflate features make reqwest advertise and decode both encodings
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        let cache = config
            .cache_ttl
            .map(|ttl| Arc::new(ResponseCache::new(ttl, config.cache_capacity)));

        Ok(Self {
            inner: Arc::new(FetcherInner {
                client,
                config,
                limiters: RwLock::new(HashMap::new()),
                cache,
            }),
        })
    }

    /// Shared response cache, if caching is enabled.
    pub fn cache(&self) -> Option<Arc<ResponseCache>> {
        self.inner.cache.clone()
    }

    /// GET with throttling, jitter and retries. A 200 may be served from or
    /// written to the cache.
    pub async fn get(&self, url: &str) -> Result<FetchResponse, FetchError> {
        if let Some(cache) = &self.inner.cache {
            if let Some(hit) = cache.get(url) {
                tracing::trace!(url = %url, "HTTP cache hit");
                return Ok(hit);
            }
        }

        let response = self.execute(Method::GET, url).await?;

        if response.is_ok() {
            if let Some(cache) = &self.inner.cache {
                cache.insert(url, &response);
            }
        }

        Ok(response)
    }

    /// HEAD with throttling, jitter and retries. Never cached.
    pub async fn head(&self, url: &str) -> Result<FetchResponse, FetchError> {
        self.execute(Method::HEAD, url).await
    }

    /// Send with throttling and jitter. 429 and 5xx are retried like transient
    /// network errors; once retries run out, the last response is returned
    /// as-is and every non-200 status is left for the caller to judge.
    async fn execute(&self, method: Method, url: &str) -> Result<FetchResponse, FetchError> {
        let parsed = Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        let domain = parsed
            .host_str()
            .ok_or_else(|| FetchError::InvalidUrl(format!("{url}: missing host")))?
            .to_ascii_lowercase();

        let config = &self.inner.config;
        let mut retry_count = 0u32;

        loop {
            self.limiter_for(&domain).until_ready().await;
            let jitter = self.jitter();
            if !jitter.is_zero() {
                tokio::time::sleep(jitter).await;
            }

            let result = self.send_once(method.clone(), url).await;

            match result {
                Ok(response) => {
                    metrics::counter!(
                        "harvester_http_requests_total",
                        "domain" => domain.clone(),
                        "status" => response.status.to_string()
                    )
                    .increment(1);

                    let status = StatusCode::from_u16(response.status)
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();

                    if retryable && retry_count < config.max_retries {
                        let delay = self.backoff(retry_count);
                        tracing::warn!(
                            url = %url,
                            status = response.status,
                            retry = retry_count + 1,
                            delay_ms = delay.as_millis() as u64,
                            "Retryable HTTP status, backing off"
                        );
                        tokio::time::sleep(delay).await;
                        retry_count += 1;
                        continue;
                    }

                    return Ok(response);
                }
                Err(e) if e.is_transient() && retry_count < config.max_retries => {
                    let delay = self.backoff(retry_count);
                    tracing::debug!(
                        url = %url,
                        error = %e,
                        retry = retry_count + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Transient fetch error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, method: Method, url: &str) -> Result<FetchResponse, FetchError> {
        let is_head = method == Method::HEAD;
        let request = self
            .inner
            .client
            .request(method, url)
            .header(USER_AGENT, random_user_agent())
            .header(
                ACCEPT,
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/rss+xml,*/*;q=0.8",
            );

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Network(e)
            }
        })?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = if is_head {
            Bytes::new()
        } else {
            read_limited_bytes(response, MAX_BODY_SIZE).await?
        };

        Ok(FetchResponse {
            status,
            body,
            headers,
            from_cache: false,
        })
    }

    /// Per-domain token bucket. Read-lock lookup first; on a miss, take the
    /// write lock and re-check before inserting.
    fn limiter_for(&self, domain: &str) -> Arc<DefaultDirectRateLimiter> {
        {
            let map = self
                .inner
                .limiters
                .read()
                .unwrap_or_else(|e| e.into_inner());
            if let Some(limiter) = map.get(domain) {
                return Arc::clone(limiter);
            }
        }

        let mut map = self
            .inner
            .limiters
            .write()
            .unwrap_or_else(|e| e.into_inner());
        if let Some(limiter) = map.get(domain) {
            return Arc::clone(limiter);
        }

        let limiter = Arc::new(RateLimiter::direct(quota_for(
            self.inner.config.requests_per_sec,
            self.inner.config.burst,
        )));
        map.insert(domain.to_owned(), Arc::clone(&limiter));
        limiter
    }

    fn jitter(&self) -> Duration {
        let min = self.inner.config.min_delay;
        let max = self.inner.config.max_delay;
        if max <= min {
            return min;
        }
        let ms = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(ms)
    }

    fn backoff(&self, retry_count: u32) -> Duration {
        self.inner.config.retry_base * 2u32.saturating_pow(retry_count)
    }
}

/// Token bucket refilling at `rps` with the given burst. Rates below one
/// request per second are expressed as a replenish period.
pub(crate) fn quota_for(rps: f64, burst: u32) -> Quota {
    let burst = NonZeroU32::new(burst.max(1)).unwrap_or(NonZeroU32::MIN);
    let rps = if rps.is_finite() && rps > 0.0 { rps } else { 0.5 };
    let period = Duration::from_secs_f64(1.0 / rps).max(Duration::from_nanos(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
        .allow_burst(burst)
}

fn random_user_agent() -> &'static str {
    USER_AGENTS[rand::rng().random_range(0..USER_AGENTS.len())]
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Bytes, FetchError> {
    let expected_length = response.content_length();

    if let Some(len) = expected_length {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    // Content-Length is the compressed size when the body was decoded, so
    // only a short read of an identity body counts as incomplete.
    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(Bytes::from(bytes))
}
