//! Scheduler configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use mcsched_runtime::config::SchedulerConfig;
//!
//! let config = SchedulerConfig::from_env()
//!     .pool_capacity(256)
//!     .watchdog_timeout(Duration::from_secs(2));
//! ```

pub mod defaults;

use std::time::Duration;

use mcsched_core::env::{env_get, env_get_ms, env_get_opt, env_get_str};
use mcsched_core::{FaultPolicy, SchedError};
use thiserror::Error;
use tracing::info;

/// Scheduler configuration with builder pattern
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pre-allocated envelopes
    pub pool_capacity: usize,
    /// Consecutive exhaustions before `exhaustion_policy` applies (0 = library default)
    pub exhaustion_threshold: u32,
    /// Action on sustained pool exhaustion
    pub exhaustion_policy: FaultPolicy,
    /// Handler budget before a stall is reported
    pub watchdog_timeout: Duration,
    /// Action after a stall has been reported
    pub stall_policy: FaultPolicy,
    /// Dispatch records kept for `history()` (0 disables)
    pub history_size: usize,
    /// Longest the timer thread sleeps without re-checking
    pub timer_max_sleep: Duration,
    /// Controller thread name
    pub thread_name: String,
    /// Controller thread stack size (None = platform default)
    pub stack_size: Option<usize>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerConfig {
    /// Library defaults, no environment lookup
    pub fn new() -> Self {
        Self {
            pool_capacity: defaults::POOL_CAPACITY,
            exhaustion_threshold: defaults::EXHAUSTION_THRESHOLD,
            exhaustion_policy: defaults::EXHAUSTION_POLICY,
            watchdog_timeout: Duration::from_millis(defaults::WATCHDOG_TIMEOUT_MS),
            stall_policy: defaults::STALL_POLICY,
            history_size: defaults::HISTORY_SIZE,
            timer_max_sleep: Duration::from_millis(defaults::TIMER_MAX_SLEEP_MS),
            thread_name: defaults::THREAD_NAME.to_string(),
            stack_size: None,
        }
    }

    /// Library defaults with environment overrides
    ///
    /// Environment variables (all optional):
    /// - `MCS_POOL_CAPACITY` - Envelope count
    /// - `MCS_EXHAUSTION_THRESHOLD` - Consecutive failures before escalation
    /// - `MCS_EXHAUSTION_POLICY` - `abort`, `panic` or `log`
    /// - `MCS_WATCHDOG_TIMEOUT_MS` - Handler budget in milliseconds
    /// - `MCS_STALL_POLICY` - `abort`, `panic` or `log`
    /// - `MCS_HISTORY_SIZE` - Dispatch history depth
    /// - `MCS_TIMER_MAX_SLEEP_MS` - Timer thread maximum sleep
    /// - `MCS_THREAD_NAME` - Controller thread name
    /// - `MCS_STACK_SIZE` - Controller thread stack size in bytes
    pub fn from_env() -> Self {
        Self {
            pool_capacity: env_get("MCS_POOL_CAPACITY", defaults::POOL_CAPACITY),
            exhaustion_threshold: env_get(
                "MCS_EXHAUSTION_THRESHOLD",
                defaults::EXHAUSTION_THRESHOLD,
            ),
            exhaustion_policy: env_get("MCS_EXHAUSTION_POLICY", defaults::EXHAUSTION_POLICY),
            watchdog_timeout: env_get_ms(
                "MCS_WATCHDOG_TIMEOUT_MS",
                Duration::from_millis(defaults::WATCHDOG_TIMEOUT_MS),
            ),
            stall_policy: env_get("MCS_STALL_POLICY", defaults::STALL_POLICY),
            history_size: env_get("MCS_HISTORY_SIZE", defaults::HISTORY_SIZE),
            timer_max_sleep: env_get_ms(
                "MCS_TIMER_MAX_SLEEP_MS",
                Duration::from_millis(defaults::TIMER_MAX_SLEEP_MS),
            ),
            thread_name: env_get_str("MCS_THREAD_NAME", defaults::THREAD_NAME),
            stack_size: env_get_opt("MCS_STACK_SIZE"),
        }
    }

    // Builder methods

    pub fn pool_capacity(mut self, n: usize) -> Self {
        self.pool_capacity = n;
        self
    }

    pub fn exhaustion_threshold(mut self, n: u32) -> Self {
        self.exhaustion_threshold = n;
        self
    }

    pub fn exhaustion_policy(mut self, p: FaultPolicy) -> Self {
        self.exhaustion_policy = p;
        self
    }

    pub fn watchdog_timeout(mut self, d: Duration) -> Self {
        self.watchdog_timeout = d;
        self
    }

    pub fn stall_policy(mut self, p: FaultPolicy) -> Self {
        self.stall_policy = p;
        self
    }

    pub fn history_size(mut self, n: usize) -> Self {
        self.history_size = n;
        self
    }

    pub fn timer_max_sleep(mut self, d: Duration) -> Self {
        self.timer_max_sleep = d;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_capacity == 0 {
            return Err(ConfigError::InvalidValue("pool_capacity must be > 0"));
        }
        if self.pool_capacity > u32::MAX as usize {
            return Err(ConfigError::InvalidValue("pool_capacity must fit in u32"));
        }
        if self.watchdog_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("watchdog_timeout must be > 0"));
        }
        if self.timer_max_sleep.is_zero() {
            return Err(ConfigError::InvalidValue("timer_max_sleep must be > 0"));
        }
        if self.history_size > defaults::MAX_HISTORY_SIZE {
            return Err(ConfigError::InvalidValue("history_size must be <= 65536"));
        }
        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(ConfigError::InvalidValue("thread_name must be non-empty text"));
        }
        if matches!(self.stack_size, Some(s) if s < defaults::MIN_STACK_SIZE) {
            return Err(ConfigError::InvalidValue("stack_size must be >= 64KB"));
        }
        Ok(())
    }

    /// Log the effective configuration at info level
    pub fn log_summary(&self) {
        info!(
            pool_capacity = self.pool_capacity,
            exhaustion_threshold = self.exhaustion_threshold,
            exhaustion_policy = %self.exhaustion_policy,
            watchdog_timeout_ms = self.watchdog_timeout.as_millis() as u64,
            stall_policy = %self.stall_policy,
            history_size = self.history_size,
            timer_max_sleep_ms = self.timer_max_sleep.as_millis() as u64,
            thread_name = %self.thread_name,
            stack_size = ?self.stack_size,
            "scheduler configuration"
        );
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

impl From<ConfigError> for SchedError {
    fn from(e: ConfigError) -> Self {
        SchedError::InvalidConfig(e.to_string())
    }
}
