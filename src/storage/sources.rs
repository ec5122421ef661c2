use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use super::repository::{ChannelPollUpdate, DUE_BATCH_LIMIT};
use super::schema::{rows_to_sources, PgRepository, SourceRow, SOURCE_COLUMNS};
use super::types::{
    Source, SourceType, StorageError, Tier, TierIntervals, QUARANTINE_ERROR_THRESHOLD,
};

impl PgRepository {
    // ========================================================================
    // Scheduling Queries
    // ========================================================================

    /// Up to 50 due sources of `source_type` per tier, oldest poll first.
    pub(crate) async fn due_by_type(
        &self,
        source_type: SourceType,
        tiers: &TierIntervals,
    ) -> Result<Vec<Source>, StorageError> {
        let sql = format!(
            "SELECT {SOURCE_COLUMNS} FROM raw_feeds \
             WHERE source_type = $1 AND tier = $2 \
               AND (last_polled_at IS NULL \
                    OR last_polled_at < NOW() - make_interval(secs => $3)) \
             ORDER BY last_polled_at ASC NULLS FIRST \
             LIMIT $4"
        );

        let mut due = Vec::new();
        for tier in Tier::ALL {
            let rows: Vec<SourceRow> = sqlx::query_as(&sql)
                .bind(source_type.as_str())
                .bind(tier.as_str())
                .bind(tiers.seconds(tier) as f64)
                .bind(DUE_BATCH_LIMIT as i64)
                .fetch_all(&self.pool)
                .await?;
            due.extend(rows_to_sources(rows)?);
        }
        Ok(due)
    }

    /// Due channels ordered by effective tier, skipping flood cooldowns.
    pub(crate) async fn due_channels(
        &self,
        tiers: &TierIntervals,
        flood_cooldown: Duration,
    ) -> Result<Vec<Source>, StorageError> {
        let sql = format!(
            "WITH candidates AS ( \
                SELECT {SOURCE_COLUMNS}, \
                       CASE WHEN priority_boost_until > NOW() THEN 'HOT' ELSE tier END \
                         AS effective_tier \
                FROM raw_feeds \
                WHERE source_type = 'CHANNEL' \
                  AND telegram_channel_id IS NOT NULL \
                  AND (last_flood_wait_at IS NULL \
                       OR last_flood_wait_at < NOW() - make_interval(secs => $5)) \
             ) \
             SELECT {SOURCE_COLUMNS} FROM candidates \
             WHERE last_polled_at IS NULL \
                OR last_polled_at < NOW() - make_interval(secs => \
                     CASE effective_tier WHEN 'HOT' THEN $1 WHEN 'WARM' THEN $2 \
                                         WHEN 'COLD' THEN $3 ELSE $4 END) \
             ORDER BY CASE effective_tier WHEN 'HOT' THEN 0 WHEN 'WARM' THEN 1 \
                                          WHEN 'COLD' THEN 2 ELSE 3 END, \
                      last_polled_at ASC NULLS FIRST \
             LIMIT $6"
        );

        let rows: Vec<SourceRow> = sqlx::query_as(&sql)
            .bind(tiers.hot as f64)
            .bind(tiers.warm as f64)
            .bind(tiers.cold as f64)
            .bind(tiers.quarantine as f64)
            .bind(flood_cooldown.as_secs_f64())
            .bind(DUE_BATCH_LIMIT as i64)
            .fetch_all(&self.pool)
            .await?;

        rows_to_sources(rows)
    }

    pub(crate) async fn get_source(&self, id: Uuid) -> Result<Option<Source>, StorageError> {
        let sql = format!("SELECT {SOURCE_COLUMNS} FROM raw_feeds WHERE id = $1");
        let row: Option<SourceRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Source::try_from).transpose()
    }

    // ========================================================================
    // Poll Bookkeeping
    // ========================================================================

    pub(crate) async fn update_poll_success(
        &self,
        id: Uuid,
        new_count: usize,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE raw_feeds SET \
                last_polled_at = NOW(), last_execution = NOW(), last_success_at = NOW(), \
                error_count = 0, last_error = NULL, last_new_items = $2, \
                tier = CASE WHEN tier = 'QUARANTINE' THEN 'COLD' ELSE tier END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(new_count as i32)
        .execute(&self.pool)
        .await?;

        ensure_updated(id, result.rows_affected())
    }

    pub(crate) async fn update_poll_error(
        &self,
        id: Uuid,
        message: &str,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE raw_feeds SET \
                last_polled_at = NOW(), last_execution = NOW(), \
                error_count = error_count + 1, last_error = $2, \
                tier = CASE WHEN error_count + 1 > $3 THEN 'QUARANTINE' ELSE tier END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .bind(QUARANTINE_ERROR_THRESHOLD)
        .execute(&self.pool)
        .await?;

        ensure_updated(id, result.rows_affected())
    }

    pub(crate) async fn update_channel_poll(
        &self,
        id: Uuid,
        update: &ChannelPollUpdate,
    ) -> Result<(), StorageError> {
        let result = match &update.error {
            None => {
                sqlx::query(
                    "UPDATE raw_feeds SET \
                        last_polled_at = NOW(), last_execution = NOW(), \
                        last_success_at = NOW(), error_count = 0, last_error = NULL, \
                        last_message_id = COALESCE($2, last_message_id), \
                        tier = CASE WHEN tier = 'QUARANTINE' THEN 'COLD' ELSE tier END \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(update.last_message_id.map(|m| m.to_string()))
                .execute(&self.pool)
                .await?
            }
            Some(message) => {
                sqlx::query(
                    "UPDATE raw_feeds SET \
                        last_polled_at = NOW(), last_execution = NOW(), \
                        error_count = error_count + 1, last_error = $2, \
                        last_flood_wait_at = CASE WHEN $3 THEN NOW() \
                                                  ELSE last_flood_wait_at END, \
                        tier = CASE WHEN error_count + 1 > $4 THEN 'QUARANTINE' ELSE tier END \
                     WHERE id = $1",
                )
                .bind(id)
                .bind(message)
                .bind(update.is_flood)
                .bind(QUARANTINE_ERROR_THRESHOLD)
                .execute(&self.pool)
                .await?
            }
        };

        ensure_updated(id, result.rows_affected())
    }

    pub(crate) async fn set_flood_wait_at(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE raw_feeds SET \
                last_flood_wait_at = $2, error_count = error_count + 1, \
                last_error = 'flood wait', \
                tier = CASE WHEN error_count + 1 > $3 THEN 'QUARANTINE' ELSE tier END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .bind(QUARANTINE_ERROR_THRESHOLD)
        .execute(&self.pool)
        .await?;

        ensure_updated(id, result.rows_affected())
    }

    pub(crate) async fn set_priority_boost(
        &self,
        id: Uuid,
        until: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query("UPDATE raw_feeds SET priority_boost_until = $2 WHERE id = $1")
            .bind(id)
            .bind(until)
            .execute(&self.pool)
            .await?;

        ensure_updated(id, result.rows_affected())
    }
}

fn ensure_updated(id: Uuid, rows_affected: u64) -> Result<(), StorageError> {
    if rows_affected == 0 {
        Err(StorageError::SourceNotFound(id))
    } else {
        Ok(())
    }
}
