//! Error types for the strand-scheduler crate.

use thiserror::Error;

use strand_store::StoreError;

/// Alias for `Result<T, ScheduleError>`.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Errors from schedule validation and scheduler operations.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// The cron expression failed to parse.
    #[error("invalid cron expression `{expression}`: {reason}")]
    InvalidExpression { expression: String, reason: String },

    /// The expression fires more often than the permitted floor.
    #[error("cron expression `{expression}` fires every {interval_secs}s; minimum is {min_secs}s")]
    TooFrequent {
        expression: String,
        interval_secs: i64,
        min_secs: i64,
    },

    /// The backing job store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
