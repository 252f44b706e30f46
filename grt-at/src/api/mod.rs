//! HTTP API for grt-at
//!
//! Two endpoints: a health check and the authenticated webhook the external
//! game server posts presence reports to.

mod webhook;

use crate::ingest::IngestPipeline;
use axum::{
    routing::{get, post},
    Json, Router,
};
use grt_common::tiers::GuildConfigStore;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestPipeline>,
    pub configs: Arc<GuildConfigStore>,
}

impl AppState {
    pub fn new(ingest: Arc<IngestPipeline>, configs: Arc<GuildConfigStore>) -> Self {
        Self { ingest, configs }
    }
}

/// Create the API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/webhooks/game-activity", post(webhook::game_activity))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "module": "grt-at",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
