//! Per-family polling engines.
//!
//! An [`Engine`] owns one supervisor task that polls immediately, then once
//! per interval (or when woken). Each cycle asks its [`SourcePoller`] for due
//! sources and polls them with bounded concurrency; one source's
//! fetch → dedup → moderate → persist → publish sequence is serial.
//!
//! Only the fetch half is subject to the per-source budget and to shutdown.
//! Once a [`Harvest`] reaches [`Ingest`], dedup through announce always runs
//! to completion so that every stored post is announced exactly once.

mod channel;
mod fingerprint;
mod rss;
mod web;

pub use channel::ChannelPoller;
pub use fingerprint::{channel_fingerprint, url_fingerprint};
pub use rss::RssPoller;
pub use web::WebPoller;

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::bus::{PostEvents, PublishError};
use crate::feed::{DiscoveryError, FeedParseError};
use crate::http::FetchError;
use crate::moderation::{ModerationClient, ModerationRequest};
use crate::storage::{NewPost, Repository, Source, StorageError};
use crate::telegram::TelegramError;

// ============================================================================
// Error Types
// ============================================================================

/// Why one source's poll failed.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("Source has no {0}")]
    MissingEndpoint(&'static str),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] FeedParseError),

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error(transparent)]
    Telegram(#[from] TelegramError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Poll exceeded {0:?}")]
    Timeout(Duration),
}

impl PollError {
    pub fn flood_wait_seconds(&self) -> Option<u32> {
        match self {
            PollError::Telegram(e) => e.flood_wait_seconds(),
            _ => None,
        }
    }
}

// ============================================================================
// Poller contract
// ============================================================================

/// Posts produced by one source's fetch, not yet deduplicated.
#[derive(Debug, Default)]
pub struct Harvest {
    pub posts: Vec<NewPost>,
    /// Highest upstream message ID seen, for cursor-based families.
    pub cursor: Option<i64>,
}

/// Family-specific half of an engine.
#[async_trait]
pub trait SourcePoller: Send + Sync + 'static {
    /// Lowercase family name used in logs and metrics labels.
    fn family(&self) -> &'static str;

    fn interval(&self) -> Duration;

    fn concurrency(&self) -> usize;

    /// Budget for one source's fetch; `None` leaves it to the underlying RPCs.
    fn source_timeout(&self) -> Option<Duration>;

    fn ingest(&self) -> &Ingest;

    async fn due_sources(&self) -> Result<Vec<Source>, StorageError>;

    /// Resolve the source's endpoint into candidate posts. May be abandoned
    /// on timeout or shutdown, so it must not write anything.
    async fn fetch(&self, source: &Source) -> Result<Harvest, PollError>;

    /// Success bookkeeping after the harvest's new posts were stored.
    async fn record_success(
        &self,
        source: &Source,
        cursor: Option<i64>,
        created: usize,
    ) -> Result<(), StorageError>;

    /// Record a failed poll on the source.
    async fn record_failure(&self, source: &Source, error: &PollError);
}

/// Counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    pub sources: usize,
    pub success: usize,
    pub errors: usize,
    pub flood_waits: usize,
    pub total_posts: usize,
}

// ============================================================================
// Shared ingestion tail
// ============================================================================

/// Dedup, moderation, persistence and announcement shared by all families.
#[derive(Clone)]
pub struct Ingest {
    repo: Arc<dyn Repository>,
    moderation: ModerationClient,
    events: PostEvents,
}

impl Ingest {
    pub fn new(repo: Arc<dyn Repository>, moderation: ModerationClient, events: PostEvents) -> Self {
        Self {
            repo,
            moderation,
            events,
        }
    }

    pub fn repo(&self) -> &Arc<dyn Repository> {
        &self.repo
    }

    /// Store the posts not yet known, in input order, each carrying its
    /// moderation verdict. Returns the new post IDs.
    pub async fn persist_new(
        &self,
        source: &Source,
        posts: Vec<NewPost>,
    ) -> Result<Vec<Uuid>, StorageError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let codes: Vec<String> = posts.iter().map(|p| p.unique_code.clone()).collect();
        let existing = self.repo.batch_check_exists(&codes).await?;

        let mut seen = HashSet::new();
        let mut fresh: Vec<NewPost> = posts
            .into_iter()
            .filter(|p| !existing.contains(&p.unique_code))
            .filter(|p| seen.insert(p.unique_code.clone()))
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        for post in &mut fresh {
            let request = ModerationRequest {
                content_id: &post.unique_code,
                source_type: source.source_type,
                source_url: post.source_url.as_deref(),
                title: post.title.as_deref(),
                text: &post.content,
                published_at: post.published_at,
            };
            post.moderation = Some(self.moderation.check(&request).await);
        }

        let ids = self.repo.batch_create(&fresh).await?;
        metrics::counter!(
            "harvester_posts_created_total",
            "family" => source.source_type.as_str().to_ascii_lowercase()
        )
        .increment(ids.len() as u64);
        Ok(ids)
    }

    /// Publish the creation event. Failures are logged; the posts stay stored.
    pub async fn announce(&self, source: &Source, ids: &[Uuid]) {
        if let Err(e) = self.events.publish_created(source, ids).await {
            log_publish_failure(source, &e);
        }
    }

    /// Persist the harvest, run the poller's bookkeeping, then announce
    /// whatever was stored. The announcement is sent even when bookkeeping
    /// fails; the bookkeeping error is returned afterwards.
    pub async fn commit<P: SourcePoller + ?Sized>(
        &self,
        poller: &P,
        source: &Source,
        harvest: Harvest,
    ) -> Result<usize, PollError> {
        let ids = self.persist_new(source, harvest.posts).await?;
        let booked = poller
            .record_success(source, harvest.cursor, ids.len())
            .await;
        self.announce(source, &ids).await;
        booked?;

        tracing::debug!(
            family = poller.family(),
            source_id = %source.id,
            created = ids.len(),
            "Source polled"
        );
        Ok(ids.len())
    }
}

fn log_publish_failure(source: &Source, error: &PublishError) {
    tracing::warn!(source_id = %source.id, error = %error, "Failed to publish raw_post.created");
}

// ============================================================================
// Engine
// ============================================================================

/// Supervisor around a [`SourcePoller`].
pub struct Engine<P: SourcePoller> {
    poller: Arc<P>,
    running: AtomicBool,
    wake: Arc<Notify>,
    task: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<P: SourcePoller> Engine<P> {
    pub fn new(poller: P) -> Self {
        Self {
            poller: Arc::new(poller),
            running: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            task: Mutex::new(None),
        }
    }

    pub fn poller(&self) -> &Arc<P> {
        &self.poller
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Handle that triggers an immediate cycle when notified.
    pub fn waker(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    /// Launch the supervisor. Returns false if already running.
    pub fn start(&self, parent: &CancellationToken) -> bool {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let cancel = parent.child_token();
        let handle = tokio::spawn(supervise(
            self.poller.clone(),
            self.wake.clone(),
            cancel.clone(),
        ));
        *self.task.lock().unwrap_or_else(|e| e.into_inner()) = Some((cancel, handle));
        tracing::info!(family = self.poller.family(), "Engine started");
        true
    }

    /// Signal the supervisor and wait for in-flight work. Returns false if
    /// not running.
    pub async fn stop(&self) -> bool {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((cancel, handle)) = task {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::error!(family = self.poller.family(), error = %e, "Engine supervisor failed");
            }
        }
        tracing::info!(family = self.poller.family(), "Engine stopped");
        true
    }

    /// Run one cycle in the caller's task.
    pub async fn poll_cycle(&self, cancel: &CancellationToken) -> CycleStats {
        run_cycle(self.poller.clone(), cancel).await
    }

    /// Poll one source now, whether or not it is due. Failures are recorded
    /// on the source as in a cycle.
    pub async fn poll_one(&self, source: &Source) -> Result<usize, PollError> {
        let fetched = fetch_within_budget(self.poller.as_ref(), source).await;
        finish(self.poller.as_ref(), source, fetched).await
    }
}

async fn supervise<P: SourcePoller>(poller: Arc<P>, wake: Arc<Notify>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(poller.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => {
                tracing::debug!(family = poller.family(), "Engine woken for an immediate cycle");
            }
        }
        run_cycle(poller.clone(), &cancel).await;
    }
}

async fn run_cycle<P: SourcePoller>(poller: Arc<P>, cancel: &CancellationToken) -> CycleStats {
    let family = poller.family();
    let mut stats = CycleStats::default();

    let due = match poller.due_sources().await {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(family, error = %e, "Failed to query due sources");
            return stats;
        }
    };
    stats.sources = due.len();
    if due.is_empty() {
        tracing::debug!(family, "No sources due");
        return stats;
    }

    let permits = Arc::new(Semaphore::new(poller.concurrency().max(1)));
    let mut workers = JoinSet::new();

    for source in due {
        let poller = poller.clone();
        let permits = permits.clone();
        let cancel = cancel.clone();
        workers.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return None;
            };
            if cancel.is_cancelled() {
                return None;
            }
            poll_source(poller.as_ref(), &source, &cancel).await
        });
    }

    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(Some(Ok(created))) => {
                stats.success += 1;
                stats.total_posts += created;
            }
            Ok(Some(Err(e))) if e.flood_wait_seconds().is_some() => stats.flood_waits += 1,
            Ok(Some(Err(_))) => stats.errors += 1,
            Ok(None) => {}
            Err(e) if e.is_panic() => {
                stats.errors += 1;
                tracing::error!(family, error = %e, "Poll worker panicked");
            }
            Err(e) => tracing::debug!(family, error = %e, "Poll worker cancelled"),
        }
    }

    tracing::info!(
        family,
        sources = stats.sources,
        success = stats.success,
        errors = stats.errors,
        flood_waits = stats.flood_waits,
        total_posts = stats.total_posts,
        "Poll cycle complete"
    );
    stats
}

/// Fetch under the budget and the cancel token, then commit without either.
/// `None` means shutdown interrupted the fetch and nothing was written.
async fn poll_source<P: SourcePoller>(
    poller: &P,
    source: &Source,
    cancel: &CancellationToken,
) -> Option<Result<usize, PollError>> {
    let fetched = tokio::select! {
        _ = cancel.cancelled() => return None,
        fetched = fetch_within_budget(poller, source) => fetched,
    };
    Some(finish(poller, source, fetched).await)
}

async fn fetch_within_budget<P: SourcePoller>(
    poller: &P,
    source: &Source,
) -> Result<Harvest, PollError> {
    match poller.source_timeout() {
        Some(budget) => tokio::time::timeout(budget, poller.fetch(source))
            .await
            .unwrap_or(Err(PollError::Timeout(budget))),
        None => poller.fetch(source).await,
    }
}

async fn finish<P: SourcePoller>(
    poller: &P,
    source: &Source,
    fetched: Result<Harvest, PollError>,
) -> Result<usize, PollError> {
    let result = match fetched {
        Ok(harvest) => poller.ingest().commit(poller, source, harvest).await,
        Err(e) => Err(e),
    };

    if let Err(e) = &result {
        tracing::warn!(
            family = poller.family(),
            source_id = %source.id,
            source = %source.identifier(),
            error = %e,
            "Source poll failed"
        );
        poller.record_failure(source, e).await;
    }
    result
}

/// Cap for this poll: `initial` on a source's first run, `steady` after.
pub(crate) fn item_cap(source: &Source, initial: usize, steady: usize) -> usize {
    if source.is_first_run() {
        initial
    } else {
        steady
    }
}
