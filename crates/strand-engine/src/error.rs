//! Error types for the strand-engine crate.
//!
//! Agent and tool failures are not engine errors; they are captured on
//! the run entities. [`EngineError`] covers storage failures and
//! lifecycle misuse (resuming something that is not paused, pausing
//! twice, resuming without a snapshot).

use thiserror::Error;
use uuid::Uuid;

use strand_store::StoreError;

/// Alias for `Result<T, EngineError>`.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A workflow run asked for human input while a request was
    /// already pending.
    #[error("workflow run {workflow_run_id} already has a pending input request")]
    PendingInputExists { workflow_run_id: Uuid },

    /// A resume targeted a request that is no longer pending.
    #[error("input request {id} is {status}, not pending")]
    RequestNotPending { id: Uuid, status: String },

    /// A resume targeted a workflow run that is not paused.
    #[error("workflow run {workflow_run_id} is {status}, not waiting for input")]
    NotWaitingForInput {
        workflow_run_id: Uuid,
        status: String,
    },

    /// The paused run has no checkpoint with a conversation snapshot.
    #[error("workflow run {workflow_run_id} has no resumable snapshot")]
    MissingSnapshot { workflow_run_id: Uuid },
}
