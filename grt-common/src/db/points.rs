//! Durable point storage
//!
//! Batch append plus the windowed count query used for cache warm-up. The
//! count query mirrors the cache's own aggregation so cold-start scores
//! match steady-state scores.

use crate::{PointRecord, PointSource, Result, SourceCounts};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::warn;

/// Append/query interface over the `user_points` table
#[derive(Debug, Clone)]
pub struct PointStore {
    pool: SqlitePool,
}

impl PointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a batch of point records in one transaction.
    ///
    /// The whole batch lands or none of it does, so a failed flush cycle can
    /// re-queue the batch without creating duplicates.
    pub async fn append_points(&self, batch: &[PointRecord]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for record in batch {
            sqlx::query(
                r#"
                INSERT INTO user_points (user_id, guild_id, source, timestamp)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(record.user_id as i64)
            .bind(record.guild_id as i64)
            .bind(record.source.as_str())
            .bind(record.timestamp)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Per-source counts for one (user, guild) pair since `since`,
    /// optionally restricted to one source. The boundary is inclusive,
    /// matching the cache's window queries.
    ///
    /// Rows with a source name this build does not know are counted out
    /// loud and skipped, matching the cache aggregator's defensive
    /// exclusion of unknown sources.
    pub async fn count_points_since(
        &self,
        user_id: u64,
        guild_id: u64,
        source_filter: Option<PointSource>,
        since: DateTime<Utc>,
    ) -> Result<SourceCounts> {
        let rows = match source_filter {
            Some(filter) => {
                sqlx::query_as::<_, (String, i64)>(
                    r#"
                    SELECT source, COUNT(*)
                    FROM user_points
                    WHERE guild_id = ? AND user_id = ? AND source = ? AND timestamp >= ?
                    GROUP BY source
                    "#,
                )
                .bind(guild_id as i64)
                .bind(user_id as i64)
                .bind(filter.as_str())
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, (String, i64)>(
                    r#"
                    SELECT source, COUNT(*)
                    FROM user_points
                    WHERE guild_id = ? AND user_id = ? AND timestamp >= ?
                    GROUP BY source
                    "#,
                )
                .bind(guild_id as i64)
                .bind(user_id as i64)
                .bind(since)
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut counts = SourceCounts::default();
        for (source, count) in rows {
            match source.parse::<PointSource>() {
                Ok(source) => counts.add_many(source, count.max(0) as u64),
                Err(_) => {
                    warn!(source = %source, "Skipping unknown point source in database");
                }
            }
        }

        Ok(counts)
    }

    /// All records at or after `since`, for cache warm-up on startup.
    ///
    /// Ordered by timestamp so the cache's per-bucket insertion order
    /// matches the order points were originally earned.
    pub async fn load_recent(&self, since: DateTime<Utc>) -> Result<Vec<PointRecord>> {
        let rows = sqlx::query_as::<_, (i64, i64, String, DateTime<Utc>)>(
            r#"
            SELECT user_id, guild_id, source, timestamp
            FROM user_points
            WHERE timestamp >= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for (user_id, guild_id, source, timestamp) in rows {
            match source.parse::<PointSource>() {
                Ok(source) => records.push(PointRecord {
                    user_id: user_id as u64,
                    guild_id: guild_id as u64,
                    source,
                    timestamp,
                }),
                Err(_) => {
                    warn!(source = %source, "Skipping unknown point source in database");
                }
            }
        }

        Ok(records)
    }
}
