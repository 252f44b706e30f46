//! # GRT Common Library
//!
//! Shared code for the GRT (Guild Rank Tracker) services including:
//! - Point record and source types with scoring weights
//! - Tier tables, guild policies and blacklists
//! - Database schema, point store and guild config queries
//! - Configuration loading
//! - Utility functions

pub mod config;
pub mod db;
pub mod error;
pub mod points;
pub mod tiers;
pub mod time;

pub use error::{Error, Result};
pub use points::{PointRecord, PointSource, SourceCounts};
