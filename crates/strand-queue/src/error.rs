//! Error types for the strand-queue crate.

use thiserror::Error;

use strand_store::StoreError;

/// Alias for `Result<T, QueueError>`.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Errors that can occur in queue operations.
///
/// Consumer failures are not queue errors; they are recorded on the
/// failed event and the sweep moves on.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The backing event store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
