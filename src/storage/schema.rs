use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use uuid::Uuid;

use super::types::{Source, SourceType, StorageError, Tier};

// ============================================================================
// Postgres Repository
// ============================================================================

/// Relational store for raw feeds and raw posts.
///
/// Table creation is owned by the migration tooling of the wider system; the
/// queries here expect `raw_feeds` and `raw_posts` as described in DESIGN.md.
#[derive(Clone)]
pub struct PgRepository {
    pub(crate) pool: PgPool,
}

impl PgRepository {
    /// Open a connection pool.
    pub async fn connect(url: &str, min: u32, max: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .min_connections(min)
            .max_connections(max.max(1))
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        tracing::info!(pool_min = min, pool_max = max, "Connected to database");
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Wait for checked-out connections to return and close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

// ============================================================================
// Row Mapping
// ============================================================================

/// Column list shared by every source query.
pub(crate) const SOURCE_COLUMNS: &str = "id, source_type, name, feed_url, site_url, \
     telegram_channel_id, telegram_username, discovery_method, last_polled_at, \
     last_success_at, last_execution, last_message_id, error_count, last_error, tier, \
     priority_boost_until, last_flood_wait_at";

#[derive(Debug, FromRow)]
pub(crate) struct SourceRow {
    id: Uuid,
    source_type: String,
    name: Option<String>,
    feed_url: Option<String>,
    site_url: Option<String>,
    telegram_channel_id: Option<i64>,
    telegram_username: Option<String>,
    discovery_method: Option<String>,
    last_polled_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_execution: Option<DateTime<Utc>>,
    last_message_id: Option<String>,
    error_count: i32,
    last_error: Option<String>,
    tier: String,
    priority_boost_until: Option<DateTime<Utc>>,
    last_flood_wait_at: Option<DateTime<Utc>>,
}

impl TryFrom<SourceRow> for Source {
    type Error = StorageError;

    fn try_from(row: SourceRow) -> Result<Self, Self::Error> {
        let source_type: SourceType =
            row.source_type
                .parse()
                .map_err(|_| StorageError::InvalidValue {
                    column: "source_type",
                    value: row.source_type.clone(),
                })?;
        let tier: Tier = row.tier.parse().map_err(|_| StorageError::InvalidValue {
            column: "tier",
            value: row.tier.clone(),
        })?;

        Ok(Source {
            id: row.id,
            source_type,
            name: row.name,
            feed_url: row.feed_url,
            site_url: row.site_url,
            telegram_channel_id: row.telegram_channel_id,
            telegram_username: row.telegram_username,
            discovery_method: row.discovery_method,
            last_polled_at: row.last_polled_at,
            last_success_at: row.last_success_at,
            last_execution: row.last_execution,
            last_message_id: row.last_message_id,
            error_count: row.error_count,
            last_error: row.last_error,
            tier,
            priority_boost_until: row.priority_boost_until,
            last_flood_wait_at: row.last_flood_wait_at,
        })
    }
}

pub(crate) fn rows_to_sources(rows: Vec<SourceRow>) -> Result<Vec<Source>, StorageError> {
    rows.into_iter().map(Source::try_from).collect()
}
