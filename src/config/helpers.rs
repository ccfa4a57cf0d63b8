//! Environment lookup helpers shared by the config resolvers.
//!
//! Values the supervisor discovers at runtime (the sidecar's ports) are
//! published into an in-process overlay instead of the real environment:
//! `std::env::set_var` is unsafe once other threads are running. Every
//! resolver reads through [`optional_env`], which consults the real
//! environment first and the overlay second.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use crate::error::ConfigError;

static INJECTED_VARS: LazyLock<RwLock<HashMap<String, String>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Read an environment variable, treating empty values as unset.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(val) if val.is_empty() => Ok(None),
        Ok(val) => Ok(Some(val)),
        Err(std::env::VarError::NotPresent) => Ok(injected_env(key)),
        Err(e) => Err(ConfigError::ParseError(format!(
            "failed to read {key}: {e}"
        ))),
    }
}

/// Parse an optional env var into `T`, falling back to `default`.
pub(crate) fn parse_optional_env<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|opt| opt.unwrap_or(default))
}

/// Parse an optional env var into `T`, keeping `None` when unset.
pub(crate) fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(key)?
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
}

/// Parse a `true`/`false` env var.
pub(crate) fn parse_bool_env(key: &str, default: bool) -> Result<bool, ConfigError> {
    optional_env(key)?
        .map(|s| s.parse())
        .transpose()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be 'true' or 'false': {e}"),
        })
        .map(|opt| opt.unwrap_or(default))
}

/// Look up a value previously published with [`inject_env_if_absent`].
pub fn injected_env(key: &str) -> Option<String> {
    INJECTED_VARS
        .read()
        .ok()
        .and_then(|vars| vars.get(key).cloned())
}

/// Publish `key=value` for the rest of the process unless the key is
/// already visible, either in the real environment or in the overlay.
///
/// Returns `true` when the value was published.
pub fn inject_env_if_absent(key: &str, value: &str) -> bool {
    if std::env::var_os(key).is_some() {
        return false;
    }
    let Ok(mut vars) = INJECTED_VARS.write() else {
        return false;
    };
    if vars.contains_key(key) {
        return false;
    }
    vars.insert(key.to_string(), value.to_string());
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injected_value_is_visible_through_optional_env() {
        let key = "SIDECAR_HELPERS_TEST_INJECTED";
        assert!(inject_env_if_absent(key, "3500"));
        assert_eq!(optional_env(key).unwrap().as_deref(), Some("3500"));
    }

    #[test]
    fn injection_never_overwrites() {
        let key = "SIDECAR_HELPERS_TEST_NO_OVERWRITE";
        assert!(inject_env_if_absent(key, "first"));
        assert!(!inject_env_if_absent(key, "second"));
        assert_eq!(injected_env(key).as_deref(), Some("first"));
    }

    #[test]
    fn real_environment_wins_over_injection() {
        // PATH is always present in the test environment.
        assert!(!inject_env_if_absent("PATH", "/nowhere"));
        assert_eq!(injected_env("PATH"), None);
    }

    #[test]
    fn parse_optional_env_uses_default_when_unset() {
        let value: u64 = parse_optional_env("SIDECAR_HELPERS_TEST_UNSET", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn parse_bool_env_rejects_garbage() {
        let key = "SIDECAR_HELPERS_TEST_BOOL";
        assert!(inject_env_if_absent(key, "yes"));
        let err = parse_bool_env(key, false).unwrap_err();
        assert!(err.to_string().contains(key));
    }
}
