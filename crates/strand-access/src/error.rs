//! Access-control error types.
//!
//! Policy evaluation and environment templating never fail — malformed
//! tool names and patterns simply do not match.  Errors only arise when
//! resolving server references against a registry.

/// Unified error type for the access crate.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// A server binding names a global server that is not registered.
    #[error("unknown tool server: {name}")]
    UnknownServer { name: String },
}

/// Convenience alias used throughout the access crate.
pub type Result<T> = std::result::Result<T, AccessError>;
