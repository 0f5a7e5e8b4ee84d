//! Scheduler counters

use std::sync::atomic::{AtomicU64, Ordering};

use mcsched_core::SchedError;

/// Monotonic counters, updated with relaxed atomics
#[derive(Default)]
pub struct SchedStats {
    posted: AtomicU64,
    priority_posted: AtomicU64,
    redirected: AtomicU64,
    rejected_invalid: AtomicU64,
    rejected_not_registered: AtomicU64,
    rejected_resources: AtomicU64,
    rejected_shutting_down: AtomicU64,
    dispatched: AtomicU64,
    handler_errors: AtomicU64,
    handler_panics: AtomicU64,
    stale: AtomicU64,
    flushed: AtomicU64,
    stalls: AtomicU64,
    timers_fired: AtomicU64,
    integrity_faults: AtomicU64,
}

/// Point-in-time copy of `SchedStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub posted: u64,
    pub priority_posted: u64,
    pub redirected: u64,
    pub rejected_invalid: u64,
    pub rejected_not_registered: u64,
    pub rejected_resources: u64,
    pub rejected_shutting_down: u64,
    pub dispatched: u64,
    pub handler_errors: u64,
    pub handler_panics: u64,
    pub stale: u64,
    pub flushed: u64,
    pub stalls: u64,
    pub timers_fired: u64,
    pub integrity_faults: u64,
}

impl StatsSnapshot {
    pub fn rejected(&self) -> u64 {
        self.rejected_invalid
            + self.rejected_not_registered
            + self.rejected_resources
            + self.rejected_shutting_down
    }
}

#[inline]
fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

impl SchedStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_posted(&self, high_priority: bool, redirected: bool) {
        bump(&self.posted);
        if high_priority {
            bump(&self.priority_posted);
        }
        if redirected {
            bump(&self.redirected);
        }
    }

    pub(crate) fn on_rejected(&self, err: &SchedError) {
        match err {
            SchedError::NotRegistered(_) => bump(&self.rejected_not_registered),
            SchedError::Resources => bump(&self.rejected_resources),
            SchedError::ShuttingDown => bump(&self.rejected_shutting_down),
            SchedError::Integrity(_) => bump(&self.integrity_faults),
            _ => bump(&self.rejected_invalid),
        }
    }

    pub(crate) fn on_dispatched(&self) {
        bump(&self.dispatched);
    }

    pub(crate) fn on_handler_error(&self) {
        bump(&self.handler_errors);
    }

    pub(crate) fn on_handler_panic(&self) {
        bump(&self.handler_panics);
    }

    pub(crate) fn on_stale(&self) {
        bump(&self.stale);
    }

    pub(crate) fn on_flushed(&self, n: u64) {
        self.flushed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn on_stall(&self) {
        bump(&self.stalls);
    }

    pub(crate) fn on_timer_fired(&self) {
        bump(&self.timers_fired);
    }

    pub(crate) fn on_integrity_fault(&self) {
        bump(&self.integrity_faults);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let l = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            posted: l(&self.posted),
            priority_posted: l(&self.priority_posted),
            redirected: l(&self.redirected),
            rejected_invalid: l(&self.rejected_invalid),
            rejected_not_registered: l(&self.rejected_not_registered),
            rejected_resources: l(&self.rejected_resources),
            rejected_shutting_down: l(&self.rejected_shutting_down),
            dispatched: l(&self.dispatched),
            handler_errors: l(&self.handler_errors),
            handler_panics: l(&self.handler_panics),
            stale: l(&self.stale),
            flushed: l(&self.flushed),
            stalls: l(&self.stalls),
            timers_fired: l(&self.timers_fired),
            integrity_faults: l(&self.integrity_faults),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcsched_core::ModuleId;

    #[test]
    fn test_rejections_by_cause() {
        let s = SchedStats::new();
        s.on_rejected(&SchedError::Resources);
        s.on_rejected(&SchedError::Resources);
        s.on_rejected(&SchedError::NotRegistered(ModuleId::new(9)));
        s.on_rejected(&SchedError::ShuttingDown);
        s.on_rejected(&SchedError::InvalidArgument("x"));
        let snap = s.snapshot();
        assert_eq!(snap.rejected_resources, 2);
        assert_eq!(snap.rejected_not_registered, 1);
        assert_eq!(snap.rejected_shutting_down, 1);
        assert_eq!(snap.rejected_invalid, 1);
        assert_eq!(snap.rejected(), 5);
    }

    #[test]
    fn test_posted_flags() {
        let s = SchedStats::new();
        s.on_posted(true, false);
        s.on_posted(false, true);
        let snap = s.snapshot();
        assert_eq!(snap.posted, 2);
        assert_eq!(snap.priority_posted, 1);
        assert_eq!(snap.redirected, 1);
    }
}
