//! Guild configuration queries
//!
//! The core treats guild configuration as read-only; administrative tooling
//! writes these tables. Loading tolerates bad rows per guild: a guild with a
//! broken tier table gets an empty one and a loud log, it never takes the
//! other guilds down with it.

use crate::tiers::{Blacklists, GuildConfig, GuildPolicy, TierEntry, TierTable};
use crate::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::warn;

/// Load every guild's configuration from the database
pub async fn load_guild_configs(pool: &SqlitePool) -> Result<HashMap<u64, GuildConfig>> {
    let settings = sqlx::query_as::<_, (i64, i64, i64, Option<String>)>(
        r#"
        SELECT guild_id, activity_window_days, keep_all_earned_tiers, webhook_secret
        FROM guild_settings
        "#,
    )
    .fetch_all(pool)
    .await?;

    let mut configs: HashMap<u64, GuildConfig> = HashMap::with_capacity(settings.len());
    for (guild_id, window_days, keep_all, webhook_secret) in settings {
        let config = GuildConfig {
            policy: GuildPolicy::new(window_days.clamp(0, u16::MAX as i64) as u16, keep_all != 0),
            tiers: TierTable::default(),
            blacklists: Blacklists::default(),
            webhook_secret,
        };
        configs.insert(guild_id as u64, config);
    }

    load_tiers(pool, &mut configs).await?;
    load_blacklists(pool, &mut configs).await?;

    Ok(configs)
}

async fn load_tiers(pool: &SqlitePool, configs: &mut HashMap<u64, GuildConfig>) -> Result<()> {
    let rows = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT guild_id, role_id, threshold FROM role_tiers",
    )
    .fetch_all(pool)
    .await?;

    let mut entries: HashMap<u64, Vec<TierEntry>> = HashMap::new();
    for (guild_id, role_id, threshold) in rows {
        entries.entry(guild_id as u64).or_default().push(TierEntry {
            role_id: role_id as u64,
            threshold: threshold.max(0) as u64,
        });
    }

    for (guild_id, tier_entries) in entries {
        let config = configs.entry(guild_id).or_default();
        match TierTable::new(tier_entries) {
            Ok(table) => config.tiers = table,
            Err(e) => {
                // Duplicate rows cannot pass the table's primary key, but a
                // hand-edited database should not break startup
                warn!(guild_id, error = %e, "Ignoring invalid tier table for guild");
            }
        }
    }

    Ok(())
}

async fn load_blacklists(pool: &SqlitePool, configs: &mut HashMap<u64, GuildConfig>) -> Result<()> {
    let role_rows = sqlx::query_as::<_, (i64, i64, String)>(
        "SELECT guild_id, role_id, source_class FROM blacklist_roles",
    )
    .fetch_all(pool)
    .await?;

    for (guild_id, role_id, source_class) in role_rows {
        let config = configs.entry(guild_id as u64).or_default();
        match source_class.as_str() {
            "text" => {
                config.blacklists.text_roles.insert(role_id as u64);
            }
            "voice" => {
                config.blacklists.voice_roles.insert(role_id as u64);
            }
            other => {
                warn!(guild_id, source_class = %other, "Ignoring unknown blacklist source class");
            }
        }
    }

    let channel_rows = sqlx::query_as::<_, (i64, i64)>(
        "SELECT guild_id, channel_id FROM blacklist_channels",
    )
    .fetch_all(pool)
    .await?;

    for (guild_id, channel_id) in channel_rows {
        let config = configs.entry(guild_id as u64).or_default();
        config.blacklists.channels.insert(channel_id as u64);
    }

    Ok(())
}
