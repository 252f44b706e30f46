//! Database initialization
//!
//! Creates the database on first run and brings the schema up idempotently.
//! Safe to call on every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    // Enable foreign keys
    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL mode: the flush scheduler writes batches while the warm-up and
    // sweep paths read concurrently
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    // Schema creation (idempotent - safe to call multiple times)
    create_guild_settings_table(&pool).await?;
    create_role_tiers_table(&pool).await?;
    create_blacklist_roles_table(&pool).await?;
    create_blacklist_channels_table(&pool).await?;
    create_user_points_table(&pool).await?;

    Ok(pool)
}

async fn create_guild_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS guild_settings (
            guild_id INTEGER PRIMARY KEY,
            activity_window_days INTEGER NOT NULL DEFAULT 7,
            keep_all_earned_tiers INTEGER NOT NULL DEFAULT 0,
            webhook_secret TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_role_tiers_table(pool: &SqlitePool) -> Result<()> {
    // One threshold per role per guild; equal thresholds across roles allowed
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS role_tiers (
            guild_id INTEGER NOT NULL,
            role_id INTEGER NOT NULL,
            threshold INTEGER NOT NULL,
            PRIMARY KEY (guild_id, role_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_blacklist_roles_table(pool: &SqlitePool) -> Result<()> {
    // source_class is 'text' or 'voice'
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blacklist_roles (
            guild_id INTEGER NOT NULL,
            role_id INTEGER NOT NULL,
            source_class TEXT NOT NULL,
            PRIMARY KEY (guild_id, role_id, source_class)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_blacklist_channels_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS blacklist_channels (
            guild_id INTEGER NOT NULL,
            channel_id INTEGER NOT NULL,
            PRIMARY KEY (guild_id, channel_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_user_points_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS user_points (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            guild_id INTEGER NOT NULL,
            source TEXT NOT NULL,
            timestamp TIMESTAMP NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Windowed per-user count queries and the warm-up scan
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_user_points_member
        ON user_points (guild_id, user_id, timestamp)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_user_points_timestamp
        ON user_points (timestamp)
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
