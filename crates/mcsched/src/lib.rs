//! # mcsched - Main-Controller Message Scheduler
//!
//! Serialized, ordered delivery of typed messages between the components
//! of a driver. Any thread posts; one controller thread runs every
//! handler, one message at a time.
//!
//! ## Features
//!
//! - **Ordered**: FIFO per destination, priority posts jump ahead of normal ones
//! - **Non-blocking posts**: fixed envelope pool, no allocation on the post path
//! - **Serialized handlers**: a single controller thread, no handler reentrancy
//! - **Watchdog**: reports handlers that overrun their time budget
//! - **Timers**: expirations are delivered on the controller thread
//! - **Clean shutdown**: every undelivered message has its flush callback run once
//!
//! ## Quick Start
//!
//! ```ignore
//! use mcsched::prelude::*;
//!
//! const STATS: ModuleId = ModuleId::new(8);
//!
//! fn main() -> SchedResult<()> {
//!     let sched = Scheduler::init(SchedulerConfig::from_env())?;
//!     sched.register_fn(STATS, "stats", |msg| {
//!         println!("stats request {}", msg.body_val);
//!         Ok(())
//!     })?;
//!     sched.enable()?;
//!
//!     sched.post(STATS, Message::new(1).with_body_val(7), false)?;
//!
//!     sched.deinit()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Producers (any thread)                    │
//! │              post(dest, msg, high_priority)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   Redirect rules → Registry → Envelope pool → Queue table   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │  POST
//!                              ▼
//!    ┌───────────┐      ┌─────────────┐      ┌───────────┐
//!    │   Timer   │─────▶│ Controller  │◀─────│ Watchdog  │
//!    │   Thread  │ SYS  │   Thread    │ arm  │  Thread   │
//!    └───────────┘      └─────────────┘      └───────────┘
//!                              │
//!                              ▼
//!                   Handler::handle(&mut Message)
//! ```

// Re-export core types
pub use mcsched_core::{
    constants, CallbackHandler, ControllerState, FaultPolicy, FlushCallback, FnHandler, Handler,
    HandlerError, HandlerResult, LifecycleState, Message, MessageCallback, ModuleId, PoolStats,
    SchedError, SchedResult, StallReport, StallSink,
};

// Re-export env utilities
pub use mcsched_core::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use mcsched_runtime::{
    ConfigError, DispatchOutcome, DispatchRecord, LogStallSink, RedirectRule, Scheduler,
    SchedulerConfig, StatsSnapshot, TimerHandle, LEGACY_FUNNEL,
};

/// Common imports for scheduler clients
pub mod prelude {
    pub use crate::{
        FaultPolicy, Handler, HandlerError, HandlerResult, Message, ModuleId, SchedError,
        SchedResult, Scheduler, SchedulerConfig,
    };
}

/// Enable a scheduler, run `f` against it, then deinit
///
/// Modules can be registered inside `f`; anything still queued when `f`
/// returns is flushed.
pub fn block_on<F, T>(config: SchedulerConfig, f: F) -> SchedResult<T>
where
    F: FnOnce(&Scheduler) -> T,
{
    let sched = Scheduler::init(config)?;
    sched.enable()?;
    let result = f(&sched);
    sched.deinit()?;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::prelude::*;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    #[test]
    fn test_block_on_round_trip() {
        let total = Arc::new(AtomicU32::new(0));
        let seen = total.clone();
        let module = ModuleId::new(ModuleId::FIRST_CLIENT);

        let posted = block_on(SchedulerConfig::new().pool_capacity(32), move |s| {
            s.register_fn(module, "sum", move |m: &mut Message| {
                seen.fetch_add(m.body_val, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
            for i in 1..=10 {
                s.post(module, Message::new(1).with_body_val(i), false).unwrap();
            }
            let deadline = Instant::now() + Duration::from_secs(5);
            while s.pool_available() < 32 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(1));
            }
            s.stats().posted
        })
        .unwrap();

        assert_eq!(posted, 10);
        assert_eq!(total.load(Ordering::SeqCst), 55);
    }

    #[test]
    fn test_block_on_rejects_bad_config() {
        let r = block_on(SchedulerConfig::new().pool_capacity(0), |_| ());
        assert!(matches!(r, Err(SchedError::InvalidConfig(_))));
    }
}
