//! Error types for grt-at
//!
//! The service surface is narrow: everything fallible is either a common
//! library operation or a group directory read.

use thiserror::Error;

/// Common result type for grt-at operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the grt-at service
#[derive(Error, Debug)]
pub enum Error {
    /// Errors bubbled up from the common library
    #[error(transparent)]
    Common(#[from] grt_common::Error),

    /// Could not read a member's current roles, so no diff could be computed
    #[error("Directory error for user {1} in guild {0}: {2}")]
    Directory(u64, u64, crate::reconcile::DirectoryError),
}
