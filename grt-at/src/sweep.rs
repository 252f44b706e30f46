//! Periodic bulk reconciliation
//!
//! Event-driven reconciliation only fires when a user earns a point, so a
//! user who goes quiet would keep their tier roles forever. The sweep walks
//! every guild on a timer and re-evaluates every member currently holding a
//! tracked tier role. Members below the lowest threshold with no tracked
//! roles need no correction, so they are not enumerated at all.

use crate::reconcile::{GroupDirectory, ReconcileEngine};
use grt_common::tiers::GuildConfigStore;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{info, warn};

pub struct SweepScheduler<D> {
    engine: Arc<ReconcileEngine<D>>,
    configs: Arc<GuildConfigStore>,
    period: Duration,
    /// Delay before the first sweep, giving the cache warm-up and producer
    /// backlog time to settle
    startup_grace: Duration,
}

impl<D: GroupDirectory + 'static> SweepScheduler<D> {
    pub fn new(
        engine: Arc<ReconcileEngine<D>>,
        configs: Arc<GuildConfigStore>,
        period: Duration,
        startup_grace: Duration,
    ) -> Self {
        Self {
            engine,
            configs,
            period,
            startup_grace,
        }
    }

    /// Run until the shutdown signal fires
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            period_secs = self.period.as_secs(),
            grace_secs = self.startup_grace.as_secs(),
            "Sweep scheduler started"
        );

        tokio::select! {
            _ = tokio::time::sleep(self.startup_grace) => {}
            _ = shutdown.changed() => {
                info!("Sweep scheduler stopping before first sweep");
                return;
            }
        }

        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_all().await;
                }
                _ = shutdown.changed() => {
                    info!("Sweep scheduler stopping");
                    return;
                }
            }
        }
    }

    /// Sweep every known guild. One guild's failure never aborts the rest.
    pub async fn sweep_all(&self) {
        let guild_ids = self.configs.guild_ids();
        info!(guilds = guild_ids.len(), "Starting tier sweep");

        let mut reconciled = 0usize;
        for guild_id in guild_ids {
            match self.sweep_guild(guild_id).await {
                Ok(count) => reconciled += count,
                Err(e) => {
                    warn!(guild_id, error = %e, "Guild sweep failed, continuing with remaining guilds");
                }
            }
        }

        info!(members = reconciled, "Tier sweep complete");
    }

    /// Reconcile every member of `guild_id` currently holding any tracked
    /// tier role. Returns how many members were evaluated.
    async fn sweep_guild(&self, guild_id: u64) -> crate::Result<usize> {
        let config = match self.configs.get(guild_id) {
            Some(config) => config,
            None => return Ok(0),
        };
        if config.tiers.is_empty() {
            return Ok(0);
        }

        // Union the holders of every tier role into one candidate set so a
        // member holding several roles is evaluated once
        let mut candidates: BTreeSet<u64> = BTreeSet::new();
        for role_id in config.tiers.role_ids() {
            match self
                .engine
                .directory()
                .list_group_members(guild_id, role_id)
                .await
            {
                Ok(members) => candidates.extend(members),
                Err(e) => {
                    warn!(guild_id, role_id, error = %e, "Could not list role members, skipping role");
                }
            }
        }

        let evaluated = candidates.len();
        for user_id in candidates {
            if let Err(e) = self.engine.reconcile_member(guild_id, user_id).await {
                warn!(guild_id, user_id, error = %e, "Sweep reconciliation failed for member");
            }
        }

        Ok(evaluated)
    }
}
