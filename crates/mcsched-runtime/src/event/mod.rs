//! Controller event word
//!
//! A 32-bit word of sticky flags the controller thread sleeps on.
//! Producers `set` bits and wake the sleeper; the controller `take`s the
//! bits it consumes. A bit set while nobody waits stays set, so a wake
//! that arrives before the controller blocks is never lost.
//!
//! Platform-specific implementations use the cheapest primitive available.

use std::time::Duration;

/// Event bits
pub mod bits {
    /// At least one envelope was queued since the controller last looked
    pub const POST: u32 = 1 << 0;
    /// Leave the dispatch loop
    pub const SHUTDOWN: u32 = 1 << 1;
    /// Park after the current drain cycle
    pub const SUSPEND: u32 = 1 << 2;
    /// Leave the suspended state
    pub const RESUME: u32 = 1 << 3;

    pub const ALL: u32 = POST | SHUTDOWN | SUSPEND | RESUME;
}

/// Sticky event flags with a blocking wait
pub trait EventWord: Send + Sync {
    /// OR `bits` into the word and wake waiters
    fn set(&self, bits: u32);

    /// Clear `bits`, returning which of them were set
    fn take(&self, bits: u32) -> u32;

    /// Current word
    fn load(&self) -> u32;

    /// Block until any bit of `mask` is set or `timeout` elapses
    ///
    /// Returns `load() & mask`; zero means timeout. Bits are not cleared.
    fn wait_any(&self, mask: u32, timeout: Option<Duration>) -> u32;
}

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexEvent as PlatformEvent;
    } else {
        mod fallback;
        pub use fallback::CondvarEvent as PlatformEvent;
    }
}

/// Create a platform-appropriate event word
pub fn new_event() -> Box<dyn EventWord> {
    Box::new(PlatformEvent::new())
}
