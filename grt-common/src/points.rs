//! Point records, sources and scoring weights
//!
//! A point is one unit of tracked activity: one qualifying message, one
//! voice-presence tick, or one game-server presence tick. Sources are a
//! closed enumeration; unknown source names coming off the wire or out of
//! the database are a boundary error, never a silent default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Hard retention floor for cached points, in days.
///
/// This is the highest activity window any guild may configure, so no read
/// path ever needs a record older than this.
pub const RETENTION_DAYS: i64 = 31;

/// Where a point came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointSource {
    /// A qualifying chat message
    Message,
    /// One minute of eligible voice presence
    Voice,
    /// One presence tick reported by the external game server
    ExternalGame,
}

impl PointSource {
    /// All source kinds, in a fixed order (used for per-source reporting)
    pub const ALL: [PointSource; 3] = [
        PointSource::Message,
        PointSource::Voice,
        PointSource::ExternalGame,
    ];

    /// Divisor applied when converting raw ticks of this source into points.
    ///
    /// Five voice or game ticks are worth one message point. Integer
    /// division truncates toward zero, so four voice ticks score nothing.
    pub fn weight(self) -> u64 {
        match self {
            PointSource::Message => 1,
            PointSource::Voice => 5,
            PointSource::ExternalGame => 5,
        }
    }

    /// Stable name used in the database `source` column
    pub fn as_str(self) -> &'static str {
        match self {
            PointSource::Message => "message",
            PointSource::Voice => "voice",
            PointSource::ExternalGame => "external_game",
        }
    }
}

impl fmt::Display for PointSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PointSource {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "message" => Ok(PointSource::Message),
            "voice" => Ok(PointSource::Voice),
            "external_game" => Ok(PointSource::ExternalGame),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown point source: {}",
                other
            ))),
        }
    }
}

/// One immutable unit of tracked activity
///
/// The timestamp is assigned at ingestion time by the service, never taken
/// from the producer, so backdating is not possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointRecord {
    pub user_id: u64,
    pub guild_id: u64,
    pub source: PointSource,
    pub timestamp: DateTime<Utc>,
}

/// Raw per-source tick counts for one (user, guild) pair
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SourceCounts {
    pub message: u64,
    pub voice: u64,
    pub external_game: u64,
}

impl SourceCounts {
    /// Count one tick of the given source
    pub fn add(&mut self, source: PointSource) {
        self.add_many(source, 1);
    }

    /// Count `n` ticks of the given source
    pub fn add_many(&mut self, source: PointSource, n: u64) {
        match source {
            PointSource::Message => self.message += n,
            PointSource::Voice => self.voice += n,
            PointSource::ExternalGame => self.external_game += n,
        }
    }

    /// Raw count for one source
    pub fn get(&self, source: PointSource) -> u64 {
        match source {
            PointSource::Message => self.message,
            PointSource::Voice => self.voice,
            PointSource::ExternalGame => self.external_game,
        }
    }

    /// Normalized score: sum over sources of floor(count / weight)
    pub fn score(&self) -> u64 {
        PointSource::ALL
            .iter()
            .map(|&s| self.get(s) / s.weight())
            .sum()
    }
}

/// Score a collection of point records.
///
/// Deterministic and pure: groups by source, counts each group, applies the
/// source weight and sums. An empty input scores 0.
pub fn score_records<'a, I>(records: I) -> u64
where
    I: IntoIterator<Item = &'a PointRecord>,
{
    let mut counts = SourceCounts::default();
    for record in records {
        counts.add(record.source);
    }
    counts.score()
}
