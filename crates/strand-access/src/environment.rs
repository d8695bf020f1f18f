//! `${NAME}` substitution for tool-server environment maps.
//!
//! Server definitions may reference host environment variables in their
//! `env` values (e.g. `GITHUB_TOKEN = "${GITHUB_TOKEN}"`).  Resolution
//! replaces every occurrence with the current process value, or the
//! empty string when the variable is unset.  Values without `${...}`
//! pass through untouched.

use std::sync::LazyLock;

use regex::Regex;

use crate::server::ServerConfig;

static VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid pattern"));

/// Substitute every `${NAME}` in `value` using `lookup`.
///
/// Unset variables resolve to the empty string.  A value may contain any
/// number of references; text outside `${...}` is preserved verbatim.
pub fn substitute_with<F>(value: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    VAR_PATTERN
        .replace_all(value, |caps: &regex::Captures<'_>| {
            lookup(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// Resolve a server config's environment map against the process
/// environment.
///
/// Pure given the environment snapshot: command, args, and name are
/// copied unchanged; only `env` values are templated.
pub fn resolve_environment(config: &ServerConfig) -> ServerConfig {
    let env = config
        .env
        .iter()
        .map(|(k, v)| (k.clone(), substitute_with(v, |name| std::env::var(name).ok())))
        .collect();

    ServerConfig {
        name: config.name.clone(),
        command: config.command.clone(),
        args: config.args.clone(),
        env,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from<'a>(map: &'a HashMap<&'a str, &'a str>) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| map.get(name).map(|v| (*v).to_string())
    }

    #[test]
    fn substitutes_set_variable() {
        let vars = HashMap::from([("X", "secret123")]);
        assert_eq!(substitute_with("${X}", lookup_from(&vars)), "secret123");
    }

    #[test]
    fn unset_variable_becomes_empty() {
        let vars = HashMap::new();
        assert_eq!(substitute_with("${X}", lookup_from(&vars)), "");
    }

    #[test]
    fn multiple_substitutions_in_one_value() {
        let vars = HashMap::from([("HOST", "localhost"), ("PORT", "8080")]);
        assert_eq!(
            substitute_with("http://${HOST}:${PORT}", lookup_from(&vars)),
            "http://localhost:8080"
        );
    }

    #[test]
    fn plain_values_pass_through() {
        let vars = HashMap::from([("X", "y")]);
        assert_eq!(
            substitute_with("no references here", lookup_from(&vars)),
            "no references here"
        );
    }

    #[test]
    fn malformed_reference_is_preserved() {
        let vars = HashMap::from([("X", "y")]);
        assert_eq!(substitute_with("${", lookup_from(&vars)), "${");
        assert_eq!(substitute_with("$X", lookup_from(&vars)), "$X");
    }

    #[test]
    fn resolve_environment_only_touches_env() {
        // Use a variable name unlikely to exist so the result is stable.
        let config = ServerConfig {
            name: "github".into(),
            command: "npx".into(),
            args: vec!["-y".into(), "github-server".into()],
            env: HashMap::from([(
                "API_TOKEN".to_string(),
                "${STRAND_TEST_UNSET_VAR_A8F2}".to_string(),
            )]),
        };

        let resolved = resolve_environment(&config);
        assert_eq!(resolved.command, "npx");
        assert_eq!(resolved.args, config.args);
        assert_eq!(resolved.env["API_TOKEN"], "");
    }
}
