//! Game-server presence webhook
//!
//! The game server posts the set of currently-online player ids once per
//! tick, authenticated with the guild's shared secret. Each reported player
//! is ingested as one external-game point; ids are string-encoded u64s
//! because the reporting side cannot represent them as numbers safely.
//!
//! Responses: 401 missing auth header, invalid secret or unknown guild,
//! 400 malformed body, 204 empty player list, 201 accepted. An empty list
//! is answered 204 before the guild secret is looked at, so an idle server
//! tick is cheap to handle and never logs an auth warning.

use super::AppState;
use crate::ingest::IngestEvent;
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use grt_common::PointSource;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct GameActivityPayload {
    #[serde(rename = "guildID")]
    guild_id: String,
    #[serde(rename = "onlineUserIDs")]
    online_user_ids: Vec<String>,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub async fn game_activity(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Auth header must be present before anything else is considered
    let authorization = match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(value) => value,
        None => {
            return error_response(StatusCode::UNAUTHORIZED, "No authorization token set.");
        }
    };

    let payload: GameActivityPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &format!("Invalid JSON POST data: {}.", e),
            );
        }
    };

    let guild_id: u64 = match payload.guild_id.parse() {
        Ok(id) => id,
        Err(_) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Provided guildID was not an integer.",
            );
        }
    };

    let mut user_ids = Vec::with_capacity(payload.online_user_ids.len());
    for raw in &payload.online_user_ids {
        match raw.parse::<u64>() {
            Ok(id) => user_ids.push(id),
            Err(_) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    "Provided onlineUserIDs entry was not an integer.",
                );
            }
        }
    }

    // Nothing to ingest, nothing to authenticate against a guild
    if user_ids.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    // The guild must be known and carry a matching secret; both failures
    // look identical to the caller
    let Some(config) = state.configs.get(guild_id) else {
        warn!(guild_id, "Game activity webhook for unknown guild");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Provided guild ID does not match any known guild.",
        );
    };
    let secret_matches = config
        .webhook_secret
        .as_deref()
        .is_some_and(|secret| secret.trim() == authorization.trim());
    if !secret_matches {
        warn!(guild_id, "Game activity webhook with invalid secret");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "Provided authorization token does not match the specified guild.",
        );
    }

    let mut accepted = 0usize;
    for user_id in &user_ids {
        let event = IngestEvent {
            user_id: *user_id,
            guild_id,
            source: PointSource::ExternalGame,
            channel_id: None,
            member_roles: Vec::new(),
        };
        if state.ingest.ingest(&event) {
            accepted += 1;
        }
    }
    info!(guild_id, players = accepted, "Ingested game presence report");

    (
        StatusCode::CREATED,
        Json(json!({ "message": "Added data successfully." })),
    )
        .into_response()
}
