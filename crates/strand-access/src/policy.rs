//! Allow/deny tool policy evaluation.
//!
//! Tool names have the form `server:method`.  Policies carry two pattern
//! lists: an empty `allow` list permits everything not denied, a
//! non-empty `allow` list permits only what it matches — and `deny`
//! always wins.  Patterns are anchored, case-sensitive, and support `*`
//! as "any run of characters", including across the `:` separator.

use regex::Regex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Tool permission policy attached to a skill or workflow.
///
/// Both fields default to empty, which means "allow everything".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolPolicy {
    /// Patterns for tools that may be invoked.  Empty = no restriction.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Patterns for tools that must never be invoked.  Deny always wins.
    #[serde(default)]
    pub deny: Vec<String>,
}

impl ToolPolicy {
    /// Policy that allows only the given patterns.
    pub fn allow_only<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: patterns.into_iter().map(Into::into).collect(),
            deny: Vec::new(),
        }
    }

    /// Policy that denies the given patterns and allows everything else.
    pub fn deny_only<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow: Vec::new(),
            deny: patterns.into_iter().map(Into::into).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Check whether `tool_name` is permitted under `policy`.
///
/// With an empty `allow` list the tool is permitted unless a `deny`
/// pattern matches.  With a non-empty `allow` list the tool must match
/// at least one `allow` pattern *and* no `deny` pattern.
pub fn is_tool_allowed(tool_name: &str, policy: &ToolPolicy) -> bool {
    if policy.deny.iter().any(|p| pattern_matches(p, tool_name)) {
        tracing::debug!(tool = %tool_name, "tool denied by policy");
        return false;
    }

    if policy.allow.is_empty() {
        return true;
    }

    let allowed = policy.allow.iter().any(|p| pattern_matches(p, tool_name));
    if !allowed {
        tracing::debug!(tool = %tool_name, "tool not in allow list");
    }
    allowed
}

/// Split a `server:method` tool name into its parts.
///
/// Returns `(None, input)` when the name has no `:` separator.  Only the
/// first separator is significant, so `github:repos:list` routes to the
/// `github` server with method `repos:list`.
pub fn split_tool_name(tool_name: &str) -> (Option<&str>, &str) {
    match tool_name.split_once(':') {
        Some((server, method)) => (Some(server), method),
        None => (None, tool_name),
    }
}

/// Anchored wildcard match: `*` matches any run of characters.
///
/// The pattern is regex-escaped segment-by-segment so that only `*` has
/// special meaning; a pattern that somehow fails to compile simply does
/// not match.
fn pattern_matches(pattern: &str, candidate: &str) -> bool {
    let mut expr = String::with_capacity(pattern.len() + 8);
    expr.push('^');
    for (i, segment) in pattern.split('*').enumerate() {
        if i > 0 {
            expr.push_str(".*");
        }
        expr.push_str(&regex::escape(segment));
    }
    expr.push('$');

    match Regex::new(&expr) {
        Ok(re) => re.is_match(candidate),
        Err(_) => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_policy_allows_everything() {
        let policy = ToolPolicy::default();
        assert!(is_tool_allowed("github:get_repo", &policy));
        assert!(is_tool_allowed("shell:execute", &policy));
        assert!(is_tool_allowed("no-separator", &policy));
    }

    #[test]
    fn deny_wins_with_empty_allow() {
        let policy = ToolPolicy::deny_only(["shell:*"]);
        assert!(!is_tool_allowed("shell:execute", &policy));
        assert!(is_tool_allowed("github:get_repo", &policy));
    }

    #[test]
    fn non_empty_allow_restricts() {
        let policy = ToolPolicy::allow_only(["github:get_*"]);
        assert!(is_tool_allowed("github:get_repo", &policy));
        assert!(is_tool_allowed("github:get_issues", &policy));
        assert!(!is_tool_allowed("github:delete_repo", &policy));
        assert!(!is_tool_allowed("slack:get_channel", &policy));
    }

    #[test]
    fn deny_wins_over_allow() {
        let policy = ToolPolicy {
            allow: vec!["github:*".into()],
            deny: vec!["github:delete_*".into()],
        };
        assert!(is_tool_allowed("github:get_repo", &policy));
        assert!(!is_tool_allowed("github:delete_repo", &policy));
    }

    #[test]
    fn star_crosses_the_separator() {
        let policy = ToolPolicy::allow_only(["git*"]);
        assert!(is_tool_allowed("github:get_repo", &policy));
        assert!(is_tool_allowed("gitlab:merge", &policy));
        assert!(!is_tool_allowed("slack:post", &policy));
    }

    #[test]
    fn matching_is_anchored_and_case_sensitive() {
        let policy = ToolPolicy::allow_only(["github:get_repo"]);
        assert!(is_tool_allowed("github:get_repo", &policy));
        assert!(!is_tool_allowed("github:get_repos", &policy));
        assert!(!is_tool_allowed("xgithub:get_repo", &policy));
        assert!(!is_tool_allowed("GitHub:get_repo", &policy));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let policy = ToolPolicy::allow_only(["math:add.sub"]);
        assert!(is_tool_allowed("math:add.sub", &policy));
        // `.` must not act as a wildcard.
        assert!(!is_tool_allowed("math:addxsub", &policy));
    }

    #[test]
    fn split_with_separator() {
        assert_eq!(
            split_tool_name("github:get_repo"),
            (Some("github"), "get_repo")
        );
    }

    #[test]
    fn split_without_separator() {
        assert_eq!(split_tool_name("builtin_tool"), (None, "builtin_tool"));
    }

    #[test]
    fn split_keeps_extra_separators_in_method() {
        assert_eq!(
            split_tool_name("github:repos:list"),
            (Some("github"), "repos:list")
        );
    }

    #[test]
    fn policy_deserializes_with_defaults() {
        let policy: ToolPolicy = serde_json::from_str("{}").unwrap();
        assert!(policy.allow.is_empty());
        assert!(policy.deny.is_empty());
    }
}
