//! In-memory point cache
//!
//! The fast path for score queries: every point earned in the last 31 days,
//! indexed by (user, guild). The durable store holds the same records for
//! cold starts; nothing here is load-bearing for durability.
//!
//! The map is split into a fixed number of shards, each behind its own
//! mutex, keyed by a hash of the user id, so unrelated users never contend.
//! All operations are CPU-only and never await; callers hold a shard lock
//! only long enough to copy the bucket slice they need.

use chrono::{DateTime, Duration, Utc};
use grt_common::points::RETENTION_DAYS;
use grt_common::{time, PointRecord, PointSource};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

const SHARD_COUNT: usize = 64;

type Bucket = Vec<PointRecord>;
type Shard = Mutex<HashMap<(u64, u64), Bucket>>;

/// Sharded in-memory index of point records keyed by (user, guild).
///
/// Explicitly constructed and handed to consumers by the process root;
/// there is no global instance.
pub struct PointCache {
    shards: Vec<Shard>,
}

impl Default for PointCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PointCache {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self { shards }
    }

    fn shard(&self, user_id: u64) -> &Shard {
        let mixed = user_id ^ (user_id >> 32);
        &self.shards[(mixed as usize) % SHARD_COUNT]
    }

    fn lock(shard: &Shard) -> std::sync::MutexGuard<'_, HashMap<(u64, u64), Bucket>> {
        // A panic while holding a shard lock poisons only that shard's map;
        // the data is plain records, safe to keep serving
        shard.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a point for a user in a guild.
    ///
    /// If `timestamp` is `None` the current time is used. The record is
    /// visible to queries as soon as this returns. Per-bucket order is kept
    /// by timestamp; out-of-order inserts (warm-up replays) are placed, not
    /// appended.
    pub fn add_point(
        &self,
        user_id: u64,
        guild_id: u64,
        source: PointSource,
        timestamp: Option<DateTime<Utc>>,
    ) {
        let record = PointRecord {
            user_id,
            guild_id,
            source,
            timestamp: timestamp.unwrap_or_else(time::now),
        };

        let mut shard = Self::lock(self.shard(user_id));
        let bucket = shard.entry((user_id, guild_id)).or_default();

        // Live ingestion arrives in order, so this is almost always a push
        let position = bucket
            .iter()
            .rposition(|r| r.timestamp <= record.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        bucket.insert(position, record);
    }

    /// All records for (user, guild) with `after <= timestamp <= before`.
    ///
    /// Returns a snapshot ordered by timestamp, recomputed per call, never a
    /// live view. A backwards range yields an empty result rather than an
    /// error.
    pub fn query_window(
        &self,
        user_id: u64,
        guild_id: u64,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
    ) -> Vec<PointRecord> {
        if after > before {
            return Vec::new();
        }

        let shard = Self::lock(self.shard(user_id));
        match shard.get(&(user_id, guild_id)) {
            Some(bucket) => bucket
                .iter()
                .filter(|r| r.timestamp >= after && r.timestamp <= before)
                .copied()
                .collect(),
            None => Vec::new(),
        }
    }

    /// All records for (user, guild) no older than `max_age`.
    ///
    /// Negative ages are clamped to zero, yielding an empty result.
    pub fn query_since(&self, user_id: u64, guild_id: u64, max_age: Duration) -> Vec<PointRecord> {
        let max_age = max_age.max(Duration::zero());
        let now = time::now();
        self.query_window(user_id, guild_id, now - max_age, now)
    }

    /// Remove every record older than the 31-day retention floor.
    ///
    /// Records exactly at or younger than the floor are kept; eviction never
    /// runs ahead of the floor because 31 days is the highest window any
    /// guild may configure. Returns the number of records removed.
    pub fn evict(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        let mut removed = 0;

        for shard in &self.shards {
            let mut shard = Self::lock(shard);
            shard.retain(|_, bucket| {
                // Buckets are timestamp-ordered, so expired records form a prefix
                let keep_from = bucket
                    .iter()
                    .position(|r| r.timestamp >= cutoff)
                    .unwrap_or(bucket.len());
                removed += keep_from;
                bucket.drain(..keep_from);
                !bucket.is_empty()
            });
        }

        if removed > 0 {
            debug!(removed, "Evicted expired points from cache");
        }
        removed
    }

    /// Bulk-load records, used to warm the cache from the durable store on
    /// startup. Returns the number of records loaded.
    pub fn warm<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = PointRecord>,
    {
        let mut loaded = 0;
        for record in records {
            self.add_point(
                record.user_id,
                record.guild_id,
                record.source,
                Some(record.timestamp),
            );
            loaded += 1;
        }
        loaded
    }

    /// Total number of cached records (for startup/eviction logging)
    pub fn point_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| Self::lock(s).values().map(Vec::len).sum::<usize>())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(days_ago: i64) -> DateTime<Utc> {
        time::now() - Duration::days(days_ago)
    }

    #[test]
    fn test_added_point_is_immediately_visible() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, None);
        let records = cache.query_since(1, 2, Duration::days(1));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, PointSource::Message);
    }

    #[test]
    fn test_buckets_are_isolated() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, None);
        cache.add_point(1, 3, PointSource::Message, None);
        cache.add_point(4, 2, PointSource::Message, None);

        assert_eq!(cache.query_since(1, 2, Duration::days(1)).len(), 1);
        assert_eq!(cache.query_since(1, 3, Duration::days(1)).len(), 1);
        assert_eq!(cache.query_since(4, 2, Duration::days(1)).len(), 1);
        assert_eq!(cache.query_since(4, 3, Duration::days(1)).len(), 0);
    }

    #[test]
    fn test_query_window_bounds_are_inclusive() {
        let cache = PointCache::new();
        let exact = ts(5);
        cache.add_point(1, 2, PointSource::Message, Some(exact));

        assert_eq!(cache.query_window(1, 2, exact, exact).len(), 1);
        assert_eq!(cache.query_window(1, 2, exact, ts(0)).len(), 1);
        assert_eq!(cache.query_window(1, 2, ts(10), exact).len(), 1);
        assert_eq!(cache.query_window(1, 2, ts(10), ts(6)).len(), 0);
    }

    #[test]
    fn test_backwards_window_is_empty_not_an_error() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, None);
        assert!(cache.query_window(1, 2, ts(0), ts(5)).is_empty());
        assert!(cache.query_since(1, 2, Duration::days(-3)).is_empty());
    }

    #[test]
    fn test_records_are_ordered_by_timestamp() {
        let cache = PointCache::new();
        // Warm-up style out-of-order inserts
        cache.add_point(1, 2, PointSource::Message, Some(ts(1)));
        cache.add_point(1, 2, PointSource::Voice, Some(ts(3)));
        cache.add_point(1, 2, PointSource::Message, Some(ts(2)));

        let records = cache.query_since(1, 2, Duration::days(10));
        assert_eq!(records.len(), 3);
        assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_evict_enforces_retention_floor() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, Some(ts(40)));
        cache.add_point(1, 2, PointSource::Message, Some(ts(32)));
        cache.add_point(1, 2, PointSource::Message, Some(ts(30)));
        cache.add_point(1, 2, PointSource::Message, Some(ts(1)));

        let removed = cache.evict(time::now());
        assert_eq!(removed, 2);

        // Nothing older than 31 days observable, nothing younger lost
        let records = cache.query_window(1, 2, ts(100), ts(0));
        assert_eq!(records.len(), 2);
        let floor = time::now() - Duration::days(RETENTION_DAYS);
        assert!(records.iter().all(|r| r.timestamp >= floor));
    }

    #[test]
    fn test_evict_drops_empty_buckets() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, Some(ts(40)));
        assert_eq!(cache.point_count(), 1);
        cache.evict(time::now());
        assert_eq!(cache.point_count(), 0);
    }

    #[test]
    fn test_evict_is_relative_to_supplied_now() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, Some(ts(5)));

        // From the perspective of a `now` 40 days ahead, the record is expired
        let removed = cache.evict(time::now() + Duration::days(40));
        assert_eq!(removed, 1);
    }

    #[test]
    fn test_query_returns_snapshot_not_live_view() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, None);
        let snapshot = cache.query_since(1, 2, Duration::days(1));
        cache.add_point(1, 2, PointSource::Message, None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(cache.query_since(1, 2, Duration::days(1)).len(), 2);
    }

    #[test]
    fn test_warm_loads_records() {
        let cache = PointCache::new();
        let records = vec![
            PointRecord {
                user_id: 1,
                guild_id: 2,
                source: PointSource::Voice,
                timestamp: ts(3),
            },
            PointRecord {
                user_id: 1,
                guild_id: 2,
                source: PointSource::Message,
                timestamp: ts(1),
            },
        ];
        assert_eq!(cache.warm(records), 2);
        assert_eq!(cache.query_since(1, 2, Duration::days(7)).len(), 2);
    }
}
