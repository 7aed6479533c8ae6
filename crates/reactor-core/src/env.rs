//! Environment variable utilities, carried over near-verbatim from
//! `gvthread-core::env` — backend-agnostic and already zero-dependency,
//! so there is nothing engine-specific to change here.

use std::str::FromStr;

/// Get environment variable parsed as type T, or return default.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// Accepts: "1", "true", "yes", "on" (case-insensitive) as true.
/// Everything else (including unset) returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Get environment variable as an optional value.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__REACTOR_TEST_UNSET__", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__REACTOR_TEST_BOOL__", "yes");
        assert!(env_get_bool("__REACTOR_TEST_BOOL__", false));
        std::env::set_var("__REACTOR_TEST_BOOL__", "0");
        assert!(!env_get_bool("__REACTOR_TEST_BOOL__", true));
        std::env::remove_var("__REACTOR_TEST_BOOL__");
    }

    #[test]
    fn test_env_get_opt_none() {
        let val: Option<usize> = env_get_opt("__REACTOR_TEST_UNSET__");
        assert!(val.is_none());
    }
}
