//! Ordered resolution of configuration values.
//!
//! A setting may come from an explicit configuration value or from one of
//! several environment variables. [`resolve_optional`] walks the candidate
//! [`Source`]s in order and returns the first non-empty value;
//! [`resolve_required`] turns "nothing found" into a [`ConfigError`].
//!
//! Environment lookups go through the [`Env`] trait so tests can use a
//! [`StaticEnv`] instead of mutating the process environment.

use std::collections::HashMap;

use crate::ConfigError;

/// Read access to environment variables.
pub trait Env: Send + Sync {
    fn var(&self, name: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// A fixed set of variables.
#[derive(Debug, Clone, Default)]
pub struct StaticEnv {
    vars: HashMap<String, String>,
}

impl StaticEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl Env for StaticEnv {
    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// A candidate location for a configuration value.
#[derive(Debug, Clone, Copy)]
pub enum Source<'a> {
    /// A value supplied directly in configuration.
    Explicit(Option<&'a str>),
    /// A named environment variable.
    Env(&'a str),
}

/// Return the first non-empty value among `sources`.
pub fn resolve_optional(sources: &[Source<'_>], env: &dyn Env) -> Option<String> {
    sources.iter().find_map(|source| {
        let value = match source {
            Source::Explicit(value) => value.map(str::to_owned),
            Source::Env(name) => env.var(name),
        };
        value.filter(|v| !v.is_empty())
    })
}

/// Like [`resolve_optional`], failing with `MissingRequired { field }` when
/// no source yields a value.
pub fn resolve_required(
    field: &str,
    sources: &[Source<'_>],
    env: &dyn Env,
) -> Result<String, ConfigError> {
    resolve_optional(sources, env).ok_or_else(|| ConfigError::MissingRequired {
        field: field.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_wins_over_env() {
        let env = StaticEnv::new().with("DB", "from-env");
        let value = resolve_optional(&[Source::Explicit(Some("explicit")), Source::Env("DB")], &env);
        assert_eq!(value.as_deref(), Some("explicit"));
    }

    #[test]
    fn test_env_sources_are_tried_in_order() {
        let env = StaticEnv::new().with("SECOND", "2");
        let value = resolve_optional(
            &[Source::Explicit(None), Source::Env("FIRST"), Source::Env("SECOND")],
            &env,
        );
        assert_eq!(value.as_deref(), Some("2"));
    }

    #[test]
    fn test_empty_values_count_as_absent() {
        let env = StaticEnv::new().with("DB", "");
        let value = resolve_optional(&[Source::Explicit(Some("")), Source::Env("DB")], &env);
        assert!(value.is_none());
    }

    #[test]
    fn test_required_reports_field_name() {
        let err = resolve_required("database_name", &[Source::Env("NOPE")], &StaticEnv::new())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingRequired {
                field: "database_name".to_string()
            }
        );
    }
}
