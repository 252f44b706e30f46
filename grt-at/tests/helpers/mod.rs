//! Shared test helpers: an in-memory group directory double with
//! per-role failure injection

#![allow(dead_code)]

use async_trait::async_trait;
use grt_at::reconcile::{DirectoryError, GroupDirectory};
use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

/// In-memory stand-in for the chat platform's role system
#[derive(Debug, Default)]
pub struct MockDirectory {
    memberships: Mutex<HashMap<(u64, u64), BTreeSet<u64>>>,
    fail_add: Mutex<HashMap<u64, DirectoryError>>,
    fail_remove: Mutex<HashMap<u64, DirectoryError>>,
    unmanageable: Mutex<BTreeSet<u64>>,
}

impl MockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a member's current roles
    pub fn set_roles(&self, guild_id: u64, user_id: u64, roles: &[u64]) {
        self.memberships
            .lock()
            .unwrap()
            .insert((guild_id, user_id), roles.iter().copied().collect());
    }

    /// Roles a member holds right now
    pub fn roles(&self, guild_id: u64, user_id: u64) -> BTreeSet<u64> {
        self.memberships
            .lock()
            .unwrap()
            .get(&(guild_id, user_id))
            .cloned()
            .unwrap_or_default()
    }

    /// Make every add of `role_id` fail with `error`
    pub fn fail_add_with(&self, role_id: u64, error: DirectoryError) {
        self.fail_add.lock().unwrap().insert(role_id, error);
    }

    /// Make every remove of `role_id` fail with `error`
    pub fn fail_remove_with(&self, role_id: u64, error: DirectoryError) {
        self.fail_remove.lock().unwrap().insert(role_id, error);
    }

    /// Fail the can_manage pre-check for `role_id`
    pub fn mark_unmanageable(&self, role_id: u64) {
        self.unmanageable.lock().unwrap().insert(role_id);
    }
}

#[async_trait]
impl GroupDirectory for MockDirectory {
    async fn add_membership(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), DirectoryError> {
        if let Some(error) = self.fail_add.lock().unwrap().get(&role_id) {
            return Err(error.clone());
        }
        self.memberships
            .lock()
            .unwrap()
            .entry((guild_id, user_id))
            .or_default()
            .insert(role_id);
        Ok(())
    }

    async fn remove_membership(
        &self,
        guild_id: u64,
        user_id: u64,
        role_id: u64,
    ) -> Result<(), DirectoryError> {
        if let Some(error) = self.fail_remove.lock().unwrap().get(&role_id) {
            return Err(error.clone());
        }
        self.memberships
            .lock()
            .unwrap()
            .entry((guild_id, user_id))
            .or_default()
            .remove(&role_id);
        Ok(())
    }

    async fn list_group_members(
        &self,
        guild_id: u64,
        role_id: u64,
    ) -> Result<Vec<u64>, DirectoryError> {
        Ok(self
            .memberships
            .lock()
            .unwrap()
            .iter()
            .filter(|((g, _), roles)| *g == guild_id && roles.contains(&role_id))
            .map(|((_, user_id), _)| *user_id)
            .collect())
    }

    async fn member_roles(
        &self,
        guild_id: u64,
        user_id: u64,
    ) -> Result<Vec<u64>, DirectoryError> {
        Ok(self.roles(guild_id, user_id).into_iter().collect())
    }

    async fn can_manage(&self, _guild_id: u64, role_id: u64) -> bool {
        !self.unmanageable.lock().unwrap().contains(&role_id)
    }
}
