use chrono::Utc;
use sqlx::types::Json;
use sqlx::QueryBuilder;
use std::collections::HashSet;
use uuid::Uuid;

use super::schema::PgRepository;
use super::types::{NewPost, StorageError};

/// Rows per INSERT statement. 15 columns * 500 stays well under Postgres'
/// 65535 bind parameter limit.
const INSERT_BATCH_SIZE: usize = 500;

/// Postgres SQLSTATE for unique_violation.
const UNIQUE_VIOLATION: &str = "23505";

impl PgRepository {
    // ========================================================================
    // Dedup Index
    // ========================================================================

    pub(crate) async fn batch_check_exists(
        &self,
        codes: &[String],
    ) -> Result<HashSet<String>, StorageError> {
        if codes.is_empty() {
            return Ok(HashSet::new());
        }

        let existing: Vec<String> =
            sqlx::query_scalar("SELECT unique_code FROM raw_posts WHERE unique_code = ANY($1)")
                .bind(codes)
                .fetch_all(&self.pool)
                .await?;

        Ok(existing.into_iter().collect())
    }

    // ========================================================================
    // Batch Insert
    // ========================================================================

    /// Insert all posts inside one transaction.
    ///
    /// IDs are generated here (UUIDv7, time ordered) so the returned vector
    /// lines up with `posts`. Any row failure drops the transaction, which
    /// rolls everything back.
    pub(crate) async fn batch_create(&self, posts: &[NewPost]) -> Result<Vec<Uuid>, StorageError> {
        if posts.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = posts.iter().map(|_| Uuid::now_v7()).collect();
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        for (chunk, chunk_ids) in posts
            .chunks(INSERT_BATCH_SIZE)
            .zip(ids.chunks(INSERT_BATCH_SIZE))
        {
            let mut builder: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(
                "INSERT INTO raw_posts (id, raw_feed_id, unique_code, content, title, media, \
                 source_url, published_at, telegram_message_id, media_group_id, \
                 moderation_action, moderation_labels, moderation_block_reasons, \
                 moderation_checked_at, created_at) ",
            );

            builder.push_values(chunk.iter().zip(chunk_ids), |mut b, (post, id)| {
                let moderation = post.moderation.as_ref();
                b.push_bind(*id)
                    .push_bind(post.raw_feed_id)
                    .push_bind(&post.unique_code)
                    .push_bind(&post.content)
                    .push_bind(&post.title)
                    .push_bind(Json(&post.media))
                    .push_bind(&post.source_url)
                    .push_bind(post.published_at)
                    .push_bind(post.telegram_message_id)
                    .push_bind(post.media_group_id)
                    .push_bind(moderation.map(|m| m.action.as_str()))
                    .push_bind(moderation.map(|m| Json(&m.labels)))
                    .push_bind(moderation.map(|m| Json(&m.block_reasons)))
                    .push_bind(moderation.map(|m| m.checked_at))
                    .push_bind(now);
            });

            builder
                .build()
                .execute(&mut *tx)
                .await
                .map_err(map_insert_error)?;
        }

        tx.commit().await?;
        Ok(ids)
    }
}

fn map_insert_error(e: sqlx::Error) -> StorageError {
    if let sqlx::Error::Database(db) = &e {
        if db.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return StorageError::Duplicate(db.message().to_string());
        }
    }
    StorageError::Database(e)
}
