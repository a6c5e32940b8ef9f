//! Environment variable utilities
//!
//! Every knob in `RuntimeConfig::from_env` goes through these helpers, so a
//! malformed value falls back to the compiled default instead of failing.
//!
//! ```ignore
//! use codeflow_core::env::{env_get, env_get_bool, env_get_micros};
//!
//! let clusters: usize = env_get("CFL_CLUSTERS", 1);
//! let pin = env_get_bool("CFL_PIN_THREADS", false);
//! let backoff = env_get_micros("CFL_BACKOFF_MAX_US", Duration::from_micros(500));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Get environment variable parsed as type T, or return default
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Parsed value, or `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Boolean flag
///
/// "1", "true", "yes", "on" are true and "0", "false", "no", "off" are
/// false (case-insensitive). Anything else, including unset, is `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Raw string, or `default` when unset
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Duration given as a whole number of microseconds
#[inline]
pub fn env_get_micros(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key).map(Duration::from_micros).unwrap_or(default)
}

/// Check if environment variable is set (regardless of value)
#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET: &str = "__CFL_TEST_UNSET_VAR__";

    #[test]
    fn test_defaults_when_unset() {
        assert_eq!(env_get::<usize>(UNSET, 42), 42);
        assert!(env_get_bool(UNSET, true));
        assert!(env_get_opt::<usize>(UNSET).is_none());
        assert_eq!(env_get_str(UNSET, "hello"), "hello");
        assert_eq!(env_get_micros(UNSET, Duration::from_micros(7)), Duration::from_micros(7));
        assert!(!env_is_set(UNSET));
    }

    #[test]
    fn test_parses_set_values() {
        std::env::set_var("__CFL_TEST_NUM__", " 123 ");
        assert_eq!(env_get::<usize>("__CFL_TEST_NUM__", 0), 123);
        assert_eq!(
            env_get_micros("__CFL_TEST_NUM__", Duration::ZERO),
            Duration::from_micros(123)
        );
        std::env::remove_var("__CFL_TEST_NUM__");
    }

    #[test]
    fn test_invalid_falls_back() {
        std::env::set_var("__CFL_TEST_BAD__", "not_a_number");
        assert_eq!(env_get::<usize>("__CFL_TEST_BAD__", 99), 99);
        std::env::remove_var("__CFL_TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        let key = "__CFL_TEST_BOOL__";
        for (val, expected) in [("1", true), ("TRUE", true), ("on", true), ("0", false), ("off", false)] {
            std::env::set_var(key, val);
            assert_eq!(env_get_bool(key, !expected), expected, "value {}", val);
        }
        std::env::set_var(key, "garbage");
        assert!(env_get_bool(key, true));
        assert!(!env_get_bool(key, false));
        std::env::remove_var(key);
    }
}
