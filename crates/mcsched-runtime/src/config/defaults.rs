//! Library defaults for `SchedulerConfig`

use mcsched_core::constants;
use mcsched_core::FaultPolicy;

pub const POOL_CAPACITY: usize = constants::DEFAULT_POOL_CAPACITY;

/// Zero selects `DEFAULT_EXHAUSTION_THRESHOLD`, independent of `pool_capacity`
pub const EXHAUSTION_THRESHOLD: u32 = 0;

pub const EXHAUSTION_POLICY: FaultPolicy = FaultPolicy::Abort;

pub const WATCHDOG_TIMEOUT_MS: u64 = constants::DEFAULT_WATCHDOG_TIMEOUT_MS;

pub const STALL_POLICY: FaultPolicy = FaultPolicy::LogOnly;

pub const HISTORY_SIZE: usize = 128;

pub const TIMER_MAX_SLEEP_MS: u64 = 100;

pub const THREAD_NAME: &str = "mc_thread";

pub const MIN_STACK_SIZE: usize = 64 * 1024;

pub const MAX_HISTORY_SIZE: usize = 1 << 16;
