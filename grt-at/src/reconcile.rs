//! Tier reconciliation engine
//!
//! Given a user's current window score, the guild's tier table and the
//! user's present role memberships, computes the minimal idempotent set of
//! add/remove operations and applies them through the external group
//! directory, one role at a time, isolating failures per role.
//!
//! The engine is stateless across calls: all state lives in the point cache
//! and in the externally-observed memberships.

use crate::aggregate::window_score;
use crate::cache::PointCache;
use crate::error::{Error, Result};
use async_trait::async_trait;
use grt_common::tiers::{GuildConfigStore, TierTable};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors the external group directory can report for a single operation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The service lacks permission to manage roles in this guild
    #[error("permission denied")]
    PermissionDenied,

    /// The role sits above the service's own highest role
    #[error("role hierarchy violation")]
    HierarchyViolation,

    /// Role, member or guild no longer exists
    #[error("not found")]
    NotFound,

    /// Transport-level failure, timeout included
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// The chat platform's role system, as narrow as the engine needs it.
///
/// Implementations are expected to bound their own call timeouts; the
/// engine treats every error as non-fatal and per-role.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    async fn add_membership(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> std::result::Result<(), DirectoryError>;

    async fn remove_membership(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> std::result::Result<(), DirectoryError>;

    /// Current members of one role
    async fn list_group_members(
        &self,
        guild_id: u64,
        role_id: u64,
    ) -> std::result::Result<Vec<u64>, DirectoryError>;

    /// Roles a member currently holds
    async fn member_roles(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> std::result::Result<Vec<u64>, DirectoryError>;

    /// Pre-check: can the service manage this role at all?
    /// Used to skip doomed operations instead of attempting them.
    async fn can_manage(&self, guild_id: u64, role_id: u64) -> bool;
}

/// Why a role operation was skipped rather than applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Failed the `can_manage` pre-check
    NotManageable,
    PermissionDenied,
    HierarchyViolation,
    NotFound,
    Unavailable,
}

impl From<&DirectoryError> for SkipReason {
    fn from(e: &DirectoryError) -> Self {
        match e {
            DirectoryError::PermissionDenied => SkipReason::PermissionDenied,
            DirectoryError::HierarchyViolation => SkipReason::HierarchyViolation,
            DirectoryError::NotFound => SkipReason::NotFound,
            DirectoryError::Unavailable(_) => SkipReason::Unavailable,
        }
    }
}

/// The add/remove sets for one member, before application
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierDiff {
    pub to_add: BTreeSet<u64>,
    pub to_remove: BTreeSet<u64>,
}

impl TierDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// What actually happened when a diff was applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: Vec<u64>,
    pub removed: Vec<u64>,
    pub skipped: Vec<(u64, SkipReason)>,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.skipped.is_empty()
    }
}

/// Compute the membership diff for one member.
///
/// `current_roles` may contain roles the tier table does not track; those
/// are never touched. With `keep_all_earned_tiers` false only the highest
/// earned tier is targeted; equal top thresholds resolve to the numerically
/// greatest role id, so repeated runs pick the same winner.
pub fn compute_diff(
    score: u64,
    tiers: &TierTable,
    current_roles: &[u64],
    keep_all_earned_tiers: bool,
) -> TierDiff {
    let earned: Vec<_> = tiers
        .entries()
        .iter()
        .filter(|t| t.threshold <= score)
        .collect();

    let target: BTreeSet<u64> = if keep_all_earned_tiers {
        earned.iter().map(|t| t.role_id).collect()
    } else {
        earned
            .iter()
            .max_by_key(|t| (t.threshold, t.role_id))
            .map(|t| t.role_id)
            .into_iter()
            .collect()
    };

    let tracked: BTreeSet<u64> = tiers.role_ids().collect();
    let current: BTreeSet<u64> = current_roles
        .iter()
        .copied()
        .filter(|r| tracked.contains(r))
        .collect();

    TierDiff {
        to_add: target.difference(&current).copied().collect(),
        to_remove: current.difference(&target).copied().collect(),
    }
}

/// Applies tier diffs for members of configured guilds
pub struct ReconcileEngine<D> {
    cache: Arc<PointCache>,
    configs: Arc<GuildConfigStore>,
    directory: Arc<D>,
}

impl<D: GroupDirectory> ReconcileEngine<D> {
    pub fn new(cache: Arc<PointCache>, configs: Arc<GuildConfigStore>, directory: Arc<D>) -> Self {
        Self {
            cache,
            configs,
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<D> {
        &self.directory
    }

    /// Re-evaluate one member's tiers and apply the resulting diff.
    ///
    /// Role-level failures are recorded in the outcome and never abort the
    /// remaining roles. Only failing to read the member's current roles
    /// aborts, since there is no diff to compute without them.
    pub async fn reconcile_member(&self, guild_id: u64, user_id: u64) -> Result<ReconcileOutcome> {
        let config = match self.configs.get(guild_id) {
            Some(config) => config,
            None => return Ok(ReconcileOutcome::default()),
        };
        if config.tiers.is_empty() {
            return Ok(ReconcileOutcome::default());
        }

        let score = window_score(
            &self.cache,
            user_id,
            guild_id,
            config.policy.activity_window_days,
        );

        let current_roles = self
            .directory
            .member_roles(guild_id, user_id)
            .await
            .map_err(|e| Error::Directory(guild_id, user_id, e))?;

        let diff = compute_diff(
            score,
            &config.tiers,
            &current_roles,
            config.policy.keep_all_earned_tiers,
        );
        if diff.is_empty() {
            debug!(guild_id, user_id, score, "Member already reconciled");
            return Ok(ReconcileOutcome::default());
        }

        Ok(self.apply(guild_id, user_id, &diff).await)
    }

    /// Apply a diff one role at a time, isolating failures per role
    async fn apply(&self, guild_id: u64, user_id: u64, diff: &TierDiff) -> ReconcileOutcome {
        let mut outcome = ReconcileOutcome::default();

        for &role_id in &diff.to_add {
            if !self.directory.can_manage(guild_id, role_id).await {
                info!(guild_id, user_id, role_id, "Skipping unmanageable role");
                outcome.skipped.push((role_id, SkipReason::NotManageable));
                continue;
            }
            match self.directory.add_membership(guild_id, user_id, role_id).await {
                Ok(()) => {
                    info!(guild_id, user_id, role_id, "Added tier role");
                    outcome.added.push(role_id);
                }
                Err(e) => {
                    warn!(guild_id, user_id, role_id, error = %e, "Failed to add tier role");
                    outcome.skipped.push((role_id, SkipReason::from(&e)));
                }
            }
        }

        for &role_id in &diff.to_remove {
            if !self.directory.can_manage(guild_id, role_id).await {
                info!(guild_id, user_id, role_id, "Skipping unmanageable role");
                outcome.skipped.push((role_id, SkipReason::NotManageable));
                continue;
            }
            match self
                .directory
                .remove_membership(guild_id, user_id, role_id)
                .await
            {
                Ok(()) => {
                    info!(guild_id, user_id, role_id, "Removed tier role");
                    outcome.removed.push(role_id);
                }
                Err(e) => {
                    warn!(guild_id, user_id, role_id, error = %e, "Failed to remove tier role");
                    outcome.skipped.push((role_id, SkipReason::from(&e)));
                }
            }
        }

        outcome
    }
}

/// Directory for standalone runs with no platform connector attached:
/// every member holds no roles and every mutation quietly succeeds.
#[derive(Debug, Default, Clone)]
pub struct NoopDirectory;

#[async_trait]
impl GroupDirectory for NoopDirectory {
    async fn add_membership(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> std::result::Result<(), DirectoryError> {
        debug!(guild_id, user_id, role_id, "NoopDirectory: add_membership");
        Ok(())
    }

    async fn remove_membership(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> std::result::Result<(), DirectoryError> {
        debug!(guild_id, user_id, role_id, "NoopDirectory: remove_membership");
        Ok(())
    }

    async fn list_group_members(
        &self,
        _guild_id: u64,
        _role_id: u64,
    ) -> std::result::Result<Vec<u64>, DirectoryError> {
        Ok(Vec::new())
    }

    async fn member_roles(
        &self,
        _guild_id: u64,
        _user_id: u64,
    ) -> std::result::Result<Vec<u64>, DirectoryError> {
        Ok(Vec::new())
    }

    async fn can_manage(&self, _guild_id: u64, _role_id: u64) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grt_common::tiers::TierEntry;

    fn tiers(entries: &[(u64, u64)]) -> TierTable {
        TierTable::new(
            entries
                .iter()
                .map(|&(role_id, threshold)| TierEntry { role_id, threshold })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_highest_only_targets_single_tier() {
        let table = tiers(&[(1, 100), (2, 500), (3, 1000)]);

        for current in [vec![], vec![1], vec![3], vec![1, 2, 3]] {
            let diff = compute_diff(750, &table, &current, false);
            let mut end_state: BTreeSet<u64> =
                current.iter().copied().filter(|r| !diff.to_remove.contains(r)).collect();
            end_state.extend(&diff.to_add);
            assert_eq!(end_state, BTreeSet::from([2]), "from {:?}", current);
        }
    }

    #[test]
    fn test_keep_all_targets_every_earned_tier() {
        let table = tiers(&[(1, 100), (2, 500), (3, 1000)]);
        let diff = compute_diff(750, &table, &[], true);
        assert_eq!(diff.to_add, BTreeSet::from([1, 2]));
        assert!(diff.to_remove.is_empty());
    }

    #[test]
    fn test_score_below_every_threshold_removes_tracked_roles() {
        let table = tiers(&[(1, 100), (2, 500)]);
        let diff = compute_diff(10, &table, &[1, 2], false);
        assert!(diff.to_add.is_empty());
        assert_eq!(diff.to_remove, BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_foreign_roles_are_never_touched() {
        let table = tiers(&[(1, 100)]);
        let diff = compute_diff(0, &table, &[99, 1], false);
        assert_eq!(diff.to_remove, BTreeSet::from([1]));
        assert!(!diff.to_remove.contains(&99));
        assert!(!diff.to_add.contains(&99));
    }

    #[test]
    fn test_equal_thresholds_tie_break_is_deterministic() {
        let table = tiers(&[(7, 100), (9, 100), (8, 100)]);
        let first = compute_diff(150, &table, &[], false);
        let second = compute_diff(150, &table, &[], false);
        assert_eq!(first, second);
        assert_eq!(first.to_add.len(), 1);
        // Numerically greatest role id wins
        assert_eq!(first.to_add, BTreeSet::from([9]));
    }

    #[test]
    fn test_diff_is_idempotent() {
        let table = tiers(&[(1, 100), (2, 500)]);
        let diff = compute_diff(600, &table, &[], false);
        assert_eq!(diff.to_add, BTreeSet::from([2]));

        // Second evaluation from the reconciled state is a no-op
        let reconciled: Vec<u64> = diff.to_add.iter().copied().collect();
        let second = compute_diff(600, &table, &reconciled, false);
        assert!(second.is_empty());
    }

    #[test]
    fn test_exact_threshold_is_earned() {
        let table = tiers(&[(1, 100)]);
        let diff = compute_diff(100, &table, &[], false);
        assert_eq!(diff.to_add, BTreeSet::from([1]));
        let diff = compute_diff(99, &table, &[], false);
        assert!(diff.to_add.is_empty());
    }

    #[test]
    fn test_empty_tier_table_yields_empty_diff() {
        let table = TierTable::default();
        assert!(compute_diff(1000, &table, &[1, 2], true).is_empty());
    }
}
