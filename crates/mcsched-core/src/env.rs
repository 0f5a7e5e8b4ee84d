//! Environment variable utilities
//!
//! Parsing helpers used by `SchedulerConfig::from_env`.
//!
//! ```ignore
//! use mcsched_core::env::{env_get, env_get_ms};
//!
//! let capacity: usize = env_get("MCS_POOL_CAPACITY", 4000);
//! let budget = env_get_ms("MCS_WATCHDOG_TIMEOUT_MS", Duration::from_secs(10));
//! ```

use std::str::FromStr;
use std::time::Duration;

/// Parse `key` as `T`, falling back to `default` when unset or unparseable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Boolean flag: "1", "true", "yes", "on" are true, "0", "false", "no", "off" are false
///
/// Anything else (including unset) returns the default.
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

/// `Some(T)` when set and parseable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Raw string value, or `default`
#[inline]
pub fn env_get_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Millisecond count parsed into a `Duration`
#[inline]
pub fn env_get_ms(key: &str, default: Duration) -> Duration {
    env_get_opt::<u64>(key)
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[inline]
pub fn env_is_set(key: &str) -> bool {
    std::env::var(key).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::FaultPolicy;

    // Each test uses its own variable names; the process environment is shared.

    #[test]
    fn test_env_get_default() {
        let val: usize = env_get("MCS_TEST_NONEXISTENT_12345", 42);
        assert_eq!(val, 42);
    }

    #[test]
    fn test_env_get_parse() {
        std::env::set_var("MCS_TEST_CAPACITY", " 128 ");
        let val: usize = env_get("MCS_TEST_CAPACITY", 0);
        assert_eq!(val, 128);
        std::env::remove_var("MCS_TEST_CAPACITY");
    }

    #[test]
    fn test_env_get_invalid_falls_back() {
        std::env::set_var("MCS_TEST_INVALID", "not_a_number");
        let val: usize = env_get("MCS_TEST_INVALID", 99);
        assert_eq!(val, 99);
        std::env::remove_var("MCS_TEST_INVALID");
    }

    #[test]
    fn test_env_get_bool() {
        std::env::set_var("MCS_TEST_BOOL_ON", "Yes");
        std::env::set_var("MCS_TEST_BOOL_OFF", "off");
        std::env::set_var("MCS_TEST_BOOL_JUNK", "maybe");
        assert!(env_get_bool("MCS_TEST_BOOL_ON", false));
        assert!(!env_get_bool("MCS_TEST_BOOL_OFF", true));
        assert!(env_get_bool("MCS_TEST_BOOL_JUNK", true));
        assert!(!env_get_bool("MCS_TEST_BOOL_UNSET_987", false));
        std::env::remove_var("MCS_TEST_BOOL_ON");
        std::env::remove_var("MCS_TEST_BOOL_OFF");
        std::env::remove_var("MCS_TEST_BOOL_JUNK");
    }

    #[test]
    fn test_env_get_ms_and_policy() {
        std::env::set_var("MCS_TEST_TIMEOUT_MS", "250");
        std::env::set_var("MCS_TEST_POLICY", "panic");
        assert_eq!(
            env_get_ms("MCS_TEST_TIMEOUT_MS", Duration::from_secs(1)),
            Duration::from_millis(250)
        );
        assert_eq!(env_get("MCS_TEST_POLICY", FaultPolicy::Abort), FaultPolicy::Panic);
        std::env::remove_var("MCS_TEST_TIMEOUT_MS");
        std::env::remove_var("MCS_TEST_POLICY");
    }

    #[test]
    fn test_env_get_str() {
        assert_eq!(env_get_str("MCS_TEST_STR_UNSET_555", "mc"), "mc");
        assert!(!env_is_set("MCS_TEST_STR_UNSET_555"));
    }
}
