//! One-shot completion used for lifecycle handshakes
//!
//! The controller signals "started" and "exited" through these; `enable`
//! and `disable` block on them. `Scheduler::probe` waits on one with a
//! timeout. `reinit` rearms a completion so the scheduler can be enabled
//! again after a disable.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct Completion {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion {
    pub const fn new() -> Self {
        Completion {
            done: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Mark complete and wake every waiter
    pub fn complete(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        *done = true;
        drop(done);
        self.cond.notify_all();
    }

    /// Block until complete
    pub fn wait(&self) {
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            done = self.cond.wait(done).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until complete or `timeout`; returns whether it completed
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut done = self.done.lock().unwrap_or_else(PoisonError::into_inner);
        while !*done {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            done = self
                .cond
                .wait_timeout(done, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Rearm for another round
    pub fn reinit(&self) {
        *self.done.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}
