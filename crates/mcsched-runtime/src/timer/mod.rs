//! Scheduler timers
//!
//! Timers never run user code on the timer thread. On expiry the timer
//! thread posts an `MC_TIMER` message to the `SYS` queue; the callback
//! then runs on the controller thread, serialized with every other
//! handler.
//!
//! ```text
//!     start_timer / stop_timer
//!               │
//!               ▼
//!     ┌──────────────────────┐
//!     │   dyn TimerBackend   │  ◄── HeapTimerBackend
//!     └──────────────────────┘
//!               │ poll_expired()
//!               ▼
//!         TimerThread ──post(SYS, MC_TIMER)──► controller
//! ```

mod entry;
pub mod heap;
mod service;
mod worker;

pub use entry::{TimerEntry, TimerHandle, TimerKind};
pub use heap::{HeapTimerBackend, HeapTimerStats};
pub use service::TimerService;
pub use worker::{TimerStats, TimerThreadConfig, TimerThreadHandle};

use std::time::Instant;

use mcsched_core::MessageCallback;

/// A timer that reached its deadline
#[derive(Debug, Clone)]
pub struct ExpiredTimer {
    pub handle: TimerHandle,
    pub callback: MessageCallback,
    pub data: u32,
    pub kind: TimerKind,
}

/// Timer storage
///
/// Shared by API callers (insert/cancel) and the timer thread (poll).
pub trait TimerBackend: Send + Sync {
    fn insert(&self, entry: TimerEntry) -> TimerHandle;

    /// Cancel a pending timer; false if it already fired or was cancelled
    fn cancel(&self, handle: TimerHandle) -> bool;

    /// Remove and return every timer due at `now`, re-arming periodic ones
    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer>;

    /// Earliest pending deadline
    fn next_deadline(&self) -> Option<Instant>;

    /// Pending timers
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel everything; returns how many were pending
    fn clear(&self) -> usize;

    fn name(&self) -> &'static str {
        "unknown"
    }
}
