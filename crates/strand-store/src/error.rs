//! Error types for the strand-store crate.
//!
//! All storage operations return [`StoreError`] via the crate-local
//! [`Result`] alias. Uses `thiserror` for ergonomic error definitions.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A status transition violated the entity lifecycle.
    ///
    /// Terminal statuses are set exactly once; any further transition,
    /// and any human-input transition not starting from `pending`, is
    /// rejected with this variant.
    #[error("{entity} {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        to: String,
    },

    /// A record with the same identity already exists.
    #[error("{entity} already exists: {id}")]
    AlreadyExists { entity: &'static str, id: String },
}
