//! Activity Tracker (grt-at) - Main entry point
//!
//! Tracks per-user activity points across guilds and reconciles earned
//! tiers against externally-held role membership. Points arrive from the
//! message/voice producers and the game-server webhook; the durable store
//! is sqlite, the fast path is the in-memory point cache.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grt_at::api::{self, AppState};
use grt_at::cache::PointCache;
use grt_at::flush::{FlushBuffer, FlushScheduler};
use grt_at::ingest::IngestPipeline;
use grt_at::reconcile::{NoopDirectory, ReconcileEngine};
use grt_at::supervisor::{run_trigger_worker, Supervisor};
use grt_at::sweep::SweepScheduler;
use grt_common::db::{init_database, load_guild_configs, PointStore};
use grt_common::points::RETENTION_DAYS;
use grt_common::tiers::GuildConfigStore;
use grt_common::{config, time};

const FLUSH_PERIOD: Duration = Duration::from_secs(60);
const SWEEP_PERIOD: Duration = Duration::from_secs(3600);
const SWEEP_STARTUP_GRACE: Duration = Duration::from_secs(600);

/// Command-line arguments for grt-at
#[derive(Parser, Debug)]
#[command(name = "grt-at")]
#[command(about = "Activity Tracker service for GRT")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "5830", env = "GRT_AT_PORT")]
    port: u16,

    /// Root folder containing the GRT database
    #[arg(short, long, env = "GRT_ROOT_FOLDER")]
    root_folder: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grt_at=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    info!("Starting GRT Activity Tracker on port {}", args.port);

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), "GRT_ROOT_FOLDER");
    info!("Root folder: {}", root_folder.display());

    let db_path = config::database_path(&root_folder);
    let pool = init_database(&db_path)
        .await
        .context("Failed to initialize database")?;

    // Guild configuration is the read surface; administrative tooling
    // writes the tables and restarts pick the changes up
    let configs = Arc::new(GuildConfigStore::new());
    let loaded = load_guild_configs(&pool)
        .await
        .context("Failed to load guild configuration")?;
    let guild_count = loaded.len();
    for (guild_id, guild_config) in loaded {
        configs.insert(guild_id, guild_config);
    }
    info!("Loaded configuration for {} guilds", guild_count);

    // Warm the cache with the full retention window so cold-start scores
    // match steady-state scores
    let store = PointStore::new(pool.clone());
    let cache = Arc::new(PointCache::new());
    let recent = store
        .load_recent(time::now() - chrono::Duration::days(RETENTION_DAYS))
        .await
        .context("Failed to load recent points for cache warm-up")?;
    let warmed = cache.warm(recent);
    info!("Warmed point cache with {} records", warmed);

    let directory = Arc::new(NoopDirectory);
    let engine = Arc::new(ReconcileEngine::new(
        cache.clone(),
        configs.clone(),
        directory,
    ));

    let buffer = Arc::new(FlushBuffer::new());
    let (trigger_tx, trigger_rx) = mpsc::unbounded_channel();
    let ingest = Arc::new(IngestPipeline::new(
        cache.clone(),
        configs.clone(),
        buffer.clone(),
        trigger_tx,
    ));

    // Background tasks
    let mut supervisor = Supervisor::new();
    let flush = FlushScheduler::new(buffer, store, cache, FLUSH_PERIOD);
    supervisor.spawn("flush", flush.run(supervisor.subscribe()));
    let sweep = SweepScheduler::new(
        engine.clone(),
        configs.clone(),
        SWEEP_PERIOD,
        SWEEP_STARTUP_GRACE,
    );
    supervisor.spawn("sweep", sweep.run(supervisor.subscribe()));
    supervisor.spawn(
        "trigger-worker",
        run_trigger_worker(engine, trigger_rx, supervisor.subscribe()),
    );

    // HTTP server
    let state = AppState::new(ingest, configs);
    let app = api::build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop the schedulers after the server so the final flush still sees
    // everything the webhook accepted
    supervisor.shutdown().await;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
