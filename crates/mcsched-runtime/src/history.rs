//! Ring of recent dispatches
//!
//! Storage is allocated once; recording overwrites the oldest entry.
//! Written only by the controller thread.

use std::time::{Duration, Instant};

use mcsched_core::{ModuleId, SpinLock};

/// How a dispatched envelope ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// Handler returned an error, carrying its label
    Failed(&'static str),
    Panicked,
    /// Destination no longer owned the queue; flushed instead of delivered
    Stale,
}

#[derive(Debug, Clone, Copy)]
pub struct DispatchRecord {
    pub seq: u64,
    pub module: ModuleId,
    pub queue_index: usize,
    pub msg_type: u16,
    pub had_callback: bool,
    pub started: Instant,
    pub duration: Duration,
    pub outcome: DispatchOutcome,
}

struct Ring {
    buf: Vec<DispatchRecord>,
    next: usize,
}

pub struct MessageHistory {
    capacity: usize,
    ring: SpinLock<Ring>,
}

impl MessageHistory {
    /// A zero capacity disables recording
    pub fn new(capacity: usize) -> Self {
        MessageHistory {
            capacity,
            ring: SpinLock::new(Ring {
                buf: Vec::with_capacity(capacity),
                next: 0,
            }),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn record(&self, rec: DispatchRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut r = self.ring.lock();
        if r.buf.len() < self.capacity {
            r.buf.push(rec);
        } else {
            let at = r.next;
            r.buf[at] = rec;
        }
        r.next = (r.next + 1) % self.capacity;
    }

    /// Records oldest first
    pub fn snapshot(&self) -> Vec<DispatchRecord> {
        let r = self.ring.lock();
        if r.buf.len() < self.capacity {
            return r.buf.clone();
        }
        let mut out = Vec::with_capacity(r.buf.len());
        out.extend_from_slice(&r.buf[r.next..]);
        out.extend_from_slice(&r.buf[..r.next]);
        out
    }

    pub fn clear(&self) {
        let mut r = self.ring.lock();
        r.buf.clear();
        r.next = 0;
    }
}
