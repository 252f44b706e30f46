//! Window scoring
//!
//! Composition of a cache window query and the pure scoring in
//! `grt_common::points`: how many points has this user earned in this guild
//! over the guild's configured activity window.

use crate::cache::PointCache;
use chrono::Duration;
use grt_common::points::score_records;

/// Score for (user, guild) over the trailing `window_days` days
pub fn window_score(cache: &PointCache, user_id: u64, guild_id: u64, window_days: u16) -> u64 {
    let records = cache.query_since(user_id, guild_id, Duration::days(window_days as i64));
    score_records(records.iter())
}

#[cfg(test)]
mod tests {
    use super::*;
    use grt_common::{time, PointSource};

    #[test]
    fn test_window_score_applies_weights() {
        let cache = PointCache::new();
        for _ in 0..7 {
            cache.add_point(1, 2, PointSource::Message, None);
        }
        for _ in 0..12 {
            cache.add_point(1, 2, PointSource::Voice, None);
        }
        for _ in 0..3 {
            cache.add_point(1, 2, PointSource::ExternalGame, None);
        }

        // 7 + 12/5 + 3/5 = 9
        assert_eq!(window_score(&cache, 1, 2, 7), 9);
    }

    #[test]
    fn test_window_score_excludes_old_records() {
        let cache = PointCache::new();
        cache.add_point(1, 2, PointSource::Message, Some(time::now() - Duration::days(10)));
        cache.add_point(1, 2, PointSource::Message, None);

        assert_eq!(window_score(&cache, 1, 2, 7), 1);
        assert_eq!(window_score(&cache, 1, 2, 14), 2);
    }

    #[test]
    fn test_window_score_empty_is_zero() {
        let cache = PointCache::new();
        assert_eq!(window_score(&cache, 1, 2, 7), 0);
    }
}
