//! Tool access control and routing for Strand.
//!
//! This crate provides:
//!
//! - **Policy evaluation**: allow/deny wildcard patterns over
//!   `server:method` tool names via [`policy::is_tool_allowed`].
//! - **Environment templating**: `${NAME}` substitution in tool-server
//!   environment maps via [`environment::resolve_environment`].
//! - **Server references**: the polymorphic server binding
//!   ([`server::ServerRef`]) and its resolution to a uniform
//!   [`server::ServerConfig`].
//!
//! Everything here is synchronous and side-effect free given an
//! environment snapshot; no allocation beyond the returned values.

pub mod environment;
pub mod error;
pub mod policy;
pub mod server;

pub use environment::{resolve_environment, substitute_with};
pub use error::{AccessError, Result};
pub use policy::{ToolPolicy, is_tool_allowed, split_tool_name};
pub use server::{ServerConfig, ServerRef, resolve_servers};
