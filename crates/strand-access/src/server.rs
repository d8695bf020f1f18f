//! Tool-server configuration and the polymorphic server binding.
//!
//! A skill binds tool servers either by global name (shared definitions
//! registered once) or inline (a full per-skill config).  Both forms
//! resolve to a uniform [`ServerConfig`] before use, so downstream code
//! never type-checks the binding shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{AccessError, Result};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Launch configuration for an external tool server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Name used as the `server` part of `server:method` tool names.
    pub name: String,
    /// Executable to spawn.
    pub command: String,
    /// Arguments passed to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment map; values may contain `${NAME}` references.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// A server binding on a skill or workflow.
///
/// Serialized bindings are either a bare string (global reference) or an
/// object (inline config), so the untagged representation matches both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerRef {
    /// Reference to a server registered in the global registry.
    Global(String),
    /// Full inline configuration carried on the binding itself.
    Inline(ServerConfig),
}

impl ServerRef {
    /// Resolve this binding to a concrete config.
    ///
    /// Global references are looked up in `registry`; inline configs are
    /// returned as-is.
    pub fn resolve(&self, registry: &HashMap<String, ServerConfig>) -> Result<ServerConfig> {
        match self {
            Self::Global(name) => registry
                .get(name)
                .cloned()
                .ok_or_else(|| AccessError::UnknownServer { name: name.clone() }),
            Self::Inline(config) => Ok(config.clone()),
        }
    }
}

/// Resolve a binding list against the global registry.
///
/// Order is preserved.  The first unknown global name aborts resolution
/// so a skill never starts with a partial server set.
pub fn resolve_servers(
    refs: &[ServerRef],
    registry: &HashMap<String, ServerConfig>,
) -> Result<Vec<ServerConfig>> {
    refs.iter().map(|r| r.resolve(registry)).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> HashMap<String, ServerConfig> {
        HashMap::from([(
            "github".to_string(),
            ServerConfig {
                name: "github".into(),
                command: "github-server".into(),
                args: vec![],
                env: HashMap::new(),
            },
        )])
    }

    #[test]
    fn global_ref_resolves_from_registry() {
        let reference = ServerRef::Global("github".into());
        let config = reference.resolve(&registry()).unwrap();
        assert_eq!(config.command, "github-server");
    }

    #[test]
    fn unknown_global_ref_is_an_error() {
        let reference = ServerRef::Global("missing".into());
        let result = reference.resolve(&registry());
        assert!(matches!(result, Err(AccessError::UnknownServer { .. })));
    }

    #[test]
    fn inline_ref_resolves_to_itself() {
        let inline = ServerConfig {
            name: "local".into(),
            command: "local-server".into(),
            args: vec!["--stdio".into()],
            env: HashMap::new(),
        };
        let reference = ServerRef::Inline(inline.clone());
        assert_eq!(reference.resolve(&registry()).unwrap(), inline);
    }

    #[test]
    fn untagged_deserialization_handles_both_shapes() {
        let refs: Vec<ServerRef> = serde_json::from_str(
            r#"["github", {"name": "local", "command": "local-server"}]"#,
        )
        .unwrap();

        assert_eq!(refs[0], ServerRef::Global("github".into()));
        assert!(matches!(&refs[1], ServerRef::Inline(c) if c.name == "local"));
    }

    #[test]
    fn resolve_servers_preserves_order_and_fails_fast() {
        let refs = vec![
            ServerRef::Global("github".into()),
            ServerRef::Global("missing".into()),
        ];
        assert!(resolve_servers(&refs, &registry()).is_err());

        let refs = vec![ServerRef::Global("github".into())];
        let configs = resolve_servers(&refs, &registry()).unwrap();
        assert_eq!(configs.len(), 1);
    }
}
