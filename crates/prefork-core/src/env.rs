//! Environment variable helpers used by the server configuration
//!
//! ```ignore
//! use prefork_core::env::{env_get, env_get_bool};
//!
//! let workers: usize = env_get("PREFORK_WORKERS", 7);
//! let drain = env_get_bool("PREFORK_ACCEPT_DRAIN", true);
//! ```

use std::str::FromStr;

/// Get environment variable parsed as `T`, or `default` when unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Get environment variable as boolean.
///
/// "1", "true", "yes", "on" (any case) are true, "0", "false", "no", "off"
/// are false. Anything else, including unset, returns `default`.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// `Some(T)` if the variable is set and parses.
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Get environment variable as string, or `default`.
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("__PREFORK_TEST_UNSET__", 42);
        assert_eq!(val, 42);
        assert_eq!(env_get_str("__PREFORK_TEST_UNSET__", "127.0.0.1"), "127.0.0.1");
        assert!(env_get_opt::<u16>("__PREFORK_TEST_UNSET__").is_none());
    }

    #[test]
    fn test_env_get_parsed() {
        std::env::set_var("__PREFORK_TEST_PORT__", " 9000 ");
        let val: u16 = env_get("__PREFORK_TEST_PORT__", 0);
        assert_eq!(val, 9000);

        std::env::set_var("__PREFORK_TEST_PORT__", "not_a_port");
        let val: u16 = env_get("__PREFORK_TEST_PORT__", 1);
        assert_eq!(val, 1);
        std::env::remove_var("__PREFORK_TEST_PORT__");
    }

    #[test]
    fn test_env_get_bool_variants() {
        std::env::set_var("__PREFORK_TEST_BOOL__", "YES");
        assert!(env_get_bool("__PREFORK_TEST_BOOL__", false));

        std::env::set_var("__PREFORK_TEST_BOOL__", "off");
        assert!(!env_get_bool("__PREFORK_TEST_BOOL__", true));

        std::env::set_var("__PREFORK_TEST_BOOL__", "garbage");
        assert!(env_get_bool("__PREFORK_TEST_BOOL__", true));

        std::env::remove_var("__PREFORK_TEST_BOOL__");
    }
}
