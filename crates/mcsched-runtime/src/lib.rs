//! # mcsched-runtime
//!
//! Threads and lifecycle for the mcsched message scheduler.
//!
//! This crate provides:
//! - The controller thread that drains queues and runs handlers
//! - The event word it sleeps on (futex on Linux, condvar elsewhere)
//! - Module registration, redirect rules and the built-in queues
//! - The dispatch watchdog and the timer service
//! - `Scheduler`, which owns all of the above and drives the lifecycle

pub mod builtin;
pub mod completion;
pub mod config;
mod controller;
pub mod event;
pub mod history;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod timer;
pub mod watchdog;

// Re-exports
pub use builtin::LegacySlot;
pub use config::{ConfigError, SchedulerConfig};
pub use history::{DispatchOutcome, DispatchRecord};
pub use registry::{RedirectRule, LEGACY_FUNNEL};
pub use scheduler::Scheduler;
pub use stats::StatsSnapshot;
pub use timer::TimerHandle;
pub use watchdog::LogStallSink;
