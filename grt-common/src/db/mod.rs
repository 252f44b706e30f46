//! Database access for GRT
//!
//! sqlite is the system of record for points and guild configuration. The
//! in-memory point cache is the fast path; everything here is the durability
//! path and the cold-start source.

pub mod guilds;
pub mod init;
pub mod points;

pub use guilds::load_guild_configs;
pub use init::init_database;
pub use points::PointStore;
