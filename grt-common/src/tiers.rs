//! Tier tables, guild policies and blacklists
//!
//! A tier maps an activity-point threshold to an external role. Tier tables
//! are validated at construction: within one guild a role may carry at most
//! one threshold, and a duplicate is a configuration error surfaced to the
//! caller rather than silently corrected.

use crate::{Error, PointSource, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// One reward level: hold `threshold` points, qualify for `role_id`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierEntry {
    pub role_id: u64,
    pub threshold: u64,
}

/// Per-guild tier list, sorted descending by threshold
#[derive(Debug, Clone, Default)]
pub struct TierTable {
    entries: Vec<TierEntry>,
}

impl TierTable {
    /// Build a validated tier table.
    ///
    /// Rejects duplicate role ids. Equal thresholds across different roles
    /// are allowed.
    pub fn new(mut entries: Vec<TierEntry>) -> Result<Self> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.role_id) {
                return Err(Error::Config(format!(
                    "Duplicate tier role {} in tier table",
                    entry.role_id
                )));
            }
        }
        entries.sort_by(|a, b| b.threshold.cmp(&a.threshold));
        Ok(Self { entries })
    }

    /// Entries sorted descending by threshold
    pub fn entries(&self) -> &[TierEntry] {
        &self.entries
    }

    /// All tracked role ids, highest threshold first
    pub fn role_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.iter().map(|e| e.role_id)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Guild-scoped reconciliation policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuildPolicy {
    /// Trailing number of days summed to produce the current score
    pub activity_window_days: u16,
    /// true: keep every earned tier; false: keep only the highest
    pub keep_all_earned_tiers: bool,
}

impl GuildPolicy {
    pub const MIN_WINDOW_DAYS: u16 = 2;
    pub const MAX_WINDOW_DAYS: u16 = 365;

    /// Build a policy with the window clamped into the supported range
    pub fn new(activity_window_days: u16, keep_all_earned_tiers: bool) -> Self {
        Self {
            activity_window_days: activity_window_days
                .clamp(Self::MIN_WINDOW_DAYS, Self::MAX_WINDOW_DAYS),
            keep_all_earned_tiers,
        }
    }
}

impl Default for GuildPolicy {
    fn default() -> Self {
        Self::new(7, false)
    }
}

/// Per-guild ingestion exclusions, split by source class.
///
/// A text-blacklisted role only blocks message points; a voice-blacklisted
/// role only blocks voice points. Channel blacklists apply to the scope the
/// event occurred in.
#[derive(Debug, Clone, Default)]
pub struct Blacklists {
    pub text_roles: HashSet<u64>,
    pub voice_roles: HashSet<u64>,
    pub channels: HashSet<u64>,
}

impl Blacklists {
    /// Whether an event of `source` from a member holding `member_roles`,
    /// occurring in `channel_id` (if any), is excluded from ingestion
    pub fn blocks(
        &self,
        source: PointSource,
        member_roles: &[u64],
        channel_id: Option<u64>,
    ) -> bool {
        if let Some(channel) = channel_id {
            if self.channels.contains(&channel) {
                return true;
            }
        }
        let blocked_roles = match source {
            PointSource::Message => &self.text_roles,
            PointSource::Voice => &self.voice_roles,
            // Game presence is not channel- or role-scoped
            PointSource::ExternalGame => return false,
        };
        member_roles.iter().any(|r| blocked_roles.contains(r))
    }
}

/// Complete read-only configuration for one guild
#[derive(Debug, Clone, Default)]
pub struct GuildConfig {
    pub policy: GuildPolicy,
    pub tiers: TierTable,
    pub blacklists: Blacklists,
    /// Shared secret expected in the game-server webhook Authorization header
    pub webhook_secret: Option<String>,
}

/// Process-wide registry of guild configurations.
///
/// Read-mostly: the core only reads it, administrative tooling replaces
/// whole-guild entries. Readers get an `Arc` snapshot so config swaps never
/// race an in-flight reconciliation.
#[derive(Debug, Default)]
pub struct GuildConfigStore {
    inner: RwLock<HashMap<u64, Arc<GuildConfig>>>,
}

impl GuildConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one guild's config, if known
    pub fn get(&self, guild_id: u64) -> Option<Arc<GuildConfig>> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&guild_id)
            .cloned()
    }

    /// Snapshot of one guild's config, creating a default entry on first
    /// contact
    pub fn get_or_default(&self, guild_id: u64) -> Arc<GuildConfig> {
        if let Some(config) = self.get(guild_id) {
            return config;
        }
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        guard
            .entry(guild_id)
            .or_insert_with(|| Arc::new(GuildConfig::default()))
            .clone()
    }

    /// Replace one guild's configuration
    pub fn insert(&self, guild_id: u64, config: GuildConfig) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(guild_id, Arc::new(config));
    }

    /// All known guild ids
    pub fn guild_ids(&self) -> Vec<u64> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_table_sorts_descending() {
        let table = TierTable::new(vec![
            TierEntry { role_id: 1, threshold: 100 },
            TierEntry { role_id: 2, threshold: 1000 },
            TierEntry { role_id: 3, threshold: 500 },
        ])
        .unwrap();
        let thresholds: Vec<u64> = table.entries().iter().map(|e| e.threshold).collect();
        assert_eq!(thresholds, vec![1000, 500, 100]);
    }

    #[test]
    fn test_tier_table_rejects_duplicate_role() {
        let result = TierTable::new(vec![
            TierEntry { role_id: 1, threshold: 100 },
            TierEntry { role_id: 1, threshold: 500 },
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_tier_table_allows_equal_thresholds() {
        let table = TierTable::new(vec![
            TierEntry { role_id: 1, threshold: 100 },
            TierEntry { role_id: 2, threshold: 100 },
        ]);
        assert!(table.is_ok());
    }

    #[test]
    fn test_policy_clamps_window() {
        assert_eq!(GuildPolicy::new(0, false).activity_window_days, 2);
        assert_eq!(GuildPolicy::new(1, false).activity_window_days, 2);
        assert_eq!(GuildPolicy::new(7, false).activity_window_days, 7);
        assert_eq!(GuildPolicy::new(9999, false).activity_window_days, 365);
    }

    #[test]
    fn test_blacklists_are_source_scoped() {
        let mut blacklists = Blacklists::default();
        blacklists.text_roles.insert(10);
        blacklists.voice_roles.insert(20);
        blacklists.channels.insert(30);

        // Text role only blocks messages
        assert!(blacklists.blocks(PointSource::Message, &[10], None));
        assert!(!blacklists.blocks(PointSource::Voice, &[10], None));

        // Voice role only blocks voice
        assert!(blacklists.blocks(PointSource::Voice, &[20], None));
        assert!(!blacklists.blocks(PointSource::Message, &[20], None));

        // Channel blocks whatever happened in it
        assert!(blacklists.blocks(PointSource::Message, &[], Some(30)));
        assert!(!blacklists.blocks(PointSource::Message, &[], Some(31)));

        // Game presence ignores role blacklists
        assert!(!blacklists.blocks(PointSource::ExternalGame, &[10, 20], None));
    }

    #[test]
    fn test_config_store_creates_default_on_first_contact() {
        let store = GuildConfigStore::new();
        assert!(store.get(42).is_none());
        let config = store.get_or_default(42);
        assert_eq!(config.policy.activity_window_days, 7);
        assert!(store.get(42).is_some());
        assert_eq!(store.guild_ids(), vec![42]);
    }
}
