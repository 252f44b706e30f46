//! grt-at (Activity Tracker) library
//!
//! Core of the GRT service: the point cache, the ingestion pipeline, the
//! tier reconciliation engine, the flush and sweep schedulers and the
//! webhook API. The binary in `main.rs` wires these together; tests drive
//! them with in-memory doubles.

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod error;
pub mod flush;
pub mod ingest;
pub mod reconcile;
pub mod supervisor;
pub mod sweep;

pub use error::{Error, Result};
