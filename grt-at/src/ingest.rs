//! Ingestion pipeline
//!
//! The single write path for activity points. Producers (message observer,
//! voice sampler, game webhook) call `ingest`; the pipeline rate-limits,
//! applies the guild's blacklists, stamps the record with server time and
//! fans it out to the cache (immediately), the flush buffer (eventually
//! durable) and the reconciliation trigger queue.
//!
//! Everything on this path is in-memory; `ingest` never awaits, so no
//! producer is ever blocked by persistence or by the role directory.

use crate::cache::PointCache;
use crate::flush::FlushBuffer;
use chrono::{DateTime, Duration, Utc};
use grt_common::tiers::GuildConfigStore;
use grt_common::{time, PointSource};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Minimum spacing between accepted message points per (user, guild)
const MESSAGE_RATE_LIMIT_SECS: i64 = 60;

/// A reconciliation request for one member, queued by the pipeline and
/// drained by a background worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileTrigger {
    pub guild_id: u64,
    pub user_id: u64,
}

/// One producer event, as much context as the exclusion filters need
#[derive(Debug, Clone)]
pub struct IngestEvent {
    pub user_id: u64,
    pub guild_id: u64,
    pub source: PointSource,
    /// Scope the event occurred in, if any (text or voice channel)
    pub channel_id: Option<u64>,
    /// Roles the member currently holds, for blacklist checks
    pub member_roles: Vec<u64>,
}

pub struct IngestPipeline {
    cache: Arc<PointCache>,
    configs: Arc<GuildConfigStore>,
    buffer: Arc<FlushBuffer>,
    triggers: mpsc::UnboundedSender<ReconcileTrigger>,
    /// Timestamp of the last accepted message point per (user, guild)
    last_message: Mutex<HashMap<(u64, u64), DateTime<Utc>>>,
}

impl IngestPipeline {
    pub fn new(
        cache: Arc<PointCache>,
        configs: Arc<GuildConfigStore>,
        buffer: Arc<FlushBuffer>,
        triggers: mpsc::UnboundedSender<ReconcileTrigger>,
    ) -> Self {
        Self {
            cache,
            configs,
            buffer,
            triggers,
            last_message: Mutex::new(HashMap::new()),
        }
    }

    /// Ingest one producer event. Returns whether the event was accepted.
    ///
    /// Rejected events (rate-limited or blacklisted) are neither cached nor
    /// persisted and trigger no reconciliation.
    pub fn ingest(&self, event: &IngestEvent) -> bool {
        let now = time::now();
        let config = self.configs.get_or_default(event.guild_id);

        if config
            .blacklists
            .blocks(event.source, &event.member_roles, event.channel_id)
        {
            debug!(
                user_id = event.user_id,
                guild_id = event.guild_id,
                source = %event.source,
                "Rejected blacklisted event"
            );
            return false;
        }

        // Message spam gate; voice and game producers already tick at a
        // fixed interval and are not separately limited
        if event.source == PointSource::Message && !self.message_gate(event, now) {
            debug!(
                user_id = event.user_id,
                guild_id = event.guild_id,
                "Rejected rate-limited message"
            );
            return false;
        }

        let record = grt_common::PointRecord {
            user_id: event.user_id,
            guild_id: event.guild_id,
            source: event.source,
            timestamp: now,
        };

        self.cache
            .add_point(record.user_id, record.guild_id, record.source, Some(record.timestamp));
        self.buffer.push(record);

        // Fire-and-forget; a closed channel means we are shutting down and
        // the sweep will catch up after restart
        let _ = self.triggers.send(ReconcileTrigger {
            guild_id: event.guild_id,
            user_id: event.user_id,
        });

        true
    }

    /// Returns true if the message may pass, recording its timestamp
    fn message_gate(&self, event: &IngestEvent, now: DateTime<Utc>) -> bool {
        let mut last = self.last_message.lock().unwrap_or_else(|e| e.into_inner());
        let key = (event.user_id, event.guild_id);
        if let Some(previous) = last.get(&key) {
            if now - *previous < Duration::seconds(MESSAGE_RATE_LIMIT_SECS) {
                return false;
            }
        }
        last.insert(key, now);
        true
    }
}
