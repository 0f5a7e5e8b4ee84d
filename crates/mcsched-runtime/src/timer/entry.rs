//! Timer entry and handle types

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use mcsched_core::MessageCallback;

/// Process-unique timer handle, used to stop a timer
///
/// A periodic timer keeps its handle across re-arms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    #[inline]
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        TimerHandle(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[inline]
    pub fn raw(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    OneShot,
    Periodic { interval: Duration },
}

impl TimerKind {
    #[inline]
    pub fn is_periodic(&self) -> bool {
        matches!(self, TimerKind::Periodic { .. })
    }
}

/// A pending timer
///
/// On expiry `callback` runs on the controller thread with `data` in the
/// message's `body_val`.
#[derive(Debug, Clone)]
pub struct TimerEntry {
    pub handle: TimerHandle,
    pub deadline: Instant,
    pub callback: MessageCallback,
    pub data: u32,
    pub kind: TimerKind,
}

impl TimerEntry {
    pub fn one_shot(delay: Duration, callback: MessageCallback, data: u32) -> Self {
        Self {
            handle: TimerHandle::next(),
            deadline: Instant::now() + delay,
            callback,
            data,
            kind: TimerKind::OneShot,
        }
    }

    pub fn periodic(interval: Duration, callback: MessageCallback, data: u32) -> Self {
        Self {
            handle: TimerHandle::next(),
            deadline: Instant::now() + interval,
            callback,
            data,
            kind: TimerKind::Periodic { interval },
        }
    }

    /// Entry with an absolute deadline
    pub fn at(deadline: Instant, callback: MessageCallback, data: u32, kind: TimerKind) -> Self {
        Self {
            handle: TimerHandle::next(),
            deadline,
            callback,
            data,
            kind,
        }
    }

    #[inline]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Next occurrence of a periodic timer, same handle
    ///
    /// Deadlines advance by whole intervals from the previous one; a timer
    /// that fell behind restarts one interval from `now`.
    pub fn rearm(&self, now: Instant) -> Option<Self> {
        match self.kind {
            TimerKind::Periodic { interval } => {
                let mut deadline = self.deadline + interval;
                if deadline <= now {
                    deadline = now + interval;
                }
                Some(Self {
                    deadline,
                    ..self.clone()
                })
            }
            TimerKind::OneShot => None,
        }
    }
}
