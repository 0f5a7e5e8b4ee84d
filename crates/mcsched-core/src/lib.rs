//! # mcsched-core
//!
//! Core types for the main-controller message scheduler.
//!
//! This crate is platform-agnostic and spawns no threads.
//! Threads, event words and lifecycle live in `mcsched-runtime`.
//!
//! ## Modules
//!
//! - `id` - Module (destination) and envelope identifiers
//! - `message` - Message body, type tag and callbacks
//! - `envelope` - Envelope slot layout and ownership stages
//! - `pool` - Fixed-capacity envelope pool
//! - `queue` - Per-destination FIFO queue with priority head
//! - `state` - Controller and lifecycle state enums
//! - `traits` - Handler capability and stall-report sink
//! - `error` - Error types
//! - `fault` - Escalation policy for integrity faults
//! - `spinlock` - Short-hold spinlock for index manipulation
//! - `env` - Environment variable utilities

pub mod id;
pub mod message;
pub mod envelope;
pub mod pool;
pub mod queue;
pub mod state;
pub mod traits;
pub mod error;
pub mod fault;
pub mod spinlock;
pub mod env;

// Re-exports for convenience
pub use id::{EnvelopeId, ModuleId};
pub use message::{Body, FlushCallback, Message, MessageCallback};
pub use envelope::{Envelope, SlotState};
pub use pool::{Checkout, EnvelopePool, PoolStats};
pub use queue::MsgQueue;
pub use state::{ControllerState, LifecycleState, StateCell};
pub use traits::{CallbackHandler, FnHandler, Handler, StallReport, StallSink};
pub use error::{HandlerError, HandlerResult, SchedError, SchedResult};
pub use fault::FaultPolicy;
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str, env_is_set};

/// Scheduler-wide constants
pub mod constants {
    /// Number of addressable destinations (module ids `0..MAX_MODULES`)
    pub const MAX_MODULES: usize = 64;

    /// Number of message queues; bounds how many modules can be registered at once
    pub const MAX_QUEUES: usize = 16;

    /// Sentinel in the module -> queue table for "no queue assigned"
    pub const NO_QUEUE: u8 = u8::MAX;

    /// Default number of pre-allocated envelopes
    pub const DEFAULT_POOL_CAPACITY: usize = 4000;

    /// Consecutive failed posts tolerated before exhaustion is escalated,
    /// whatever capacity a pool was built with
    pub const DEFAULT_EXHAUSTION_THRESHOLD: u32 = 3 * DEFAULT_POOL_CAPACITY as u32;

    /// Marker stamped on every envelope that has left the free list
    pub const ENVELOPE_COOKIE: u16 = 0xFACE;

    /// Default handler budget before the watchdog reports a stall
    pub const DEFAULT_WATCHDOG_TIMEOUT_MS: u64 = 10_000;

    /// Message type carried by scheduler timer expirations on the SYS queue
    pub const SYS_MSG_ID_MC_TIMER: u16 = 0x0001;

    /// Message type for SYS probes (callback-only, no payload)
    pub const SYS_MSG_ID_MC_PROBE: u16 = 0x0002;
}
