//! BinaryHeap timer backend
//!
//! # Complexity
//!
//! - Insert: O(log n)
//! - Cancel: O(1), lazy
//! - Poll expired: O(k log n) for k expired timers
//! - Next deadline: O(1)
//!
//! # Cancellation
//!
//! `live` holds the handles of pending timers. Cancelling removes the
//! handle; the heap entry is discarded when it reaches the top.

use std::collections::{BinaryHeap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use super::{ExpiredTimer, TimerBackend, TimerEntry, TimerHandle};

/// Min-heap ordering by deadline, ties by handle
struct HeapEntry(TimerEntry);

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.0.deadline == other.0.deadline && self.0.handle == other.0.handle
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .0
            .deadline
            .cmp(&self.0.deadline)
            .then_with(|| other.0.handle.cmp(&self.0.handle))
    }
}

struct HeapInner {
    heap: BinaryHeap<HeapEntry>,
    live: HashSet<TimerHandle>,
    total_inserted: u64,
    total_fired: u64,
    total_cancelled: u64,
}

pub struct HeapTimerBackend {
    inner: Mutex<HeapInner>,
}

impl HeapTimerBackend {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HeapInner {
                heap: BinaryHeap::with_capacity(capacity),
                live: HashSet::with_capacity(capacity),
                total_inserted: 0,
                total_fired: 0,
                total_cancelled: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeapInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> HeapTimerStats {
        let inner = self.lock();
        HeapTimerStats {
            active: inner.live.len(),
            pending_cancellations: inner.heap.len().saturating_sub(inner.live.len()),
            total_inserted: inner.total_inserted,
            total_fired: inner.total_fired,
            total_cancelled: inner.total_cancelled,
        }
    }
}

impl Default for HeapTimerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerBackend for HeapTimerBackend {
    fn insert(&self, entry: TimerEntry) -> TimerHandle {
        let handle = entry.handle;
        let mut inner = self.lock();
        inner.live.insert(handle);
        inner.heap.push(HeapEntry(entry));
        inner.total_inserted += 1;
        handle
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let mut inner = self.lock();
        let removed = inner.live.remove(&handle);
        if removed {
            inner.total_cancelled += 1;
        }
        removed
    }

    fn poll_expired(&self, now: Instant) -> Vec<ExpiredTimer> {
        let mut inner = self.lock();
        let mut expired = Vec::new();
        let mut rearmed = Vec::new();

        while inner.heap.peek().is_some_and(|e| e.0.deadline <= now) {
            let Some(HeapEntry(entry)) = inner.heap.pop() else {
                break;
            };
            if !inner.live.contains(&entry.handle) {
                continue;
            }
            match entry.rearm(now) {
                Some(next) => rearmed.push(next),
                None => {
                    inner.live.remove(&entry.handle);
                }
            }
            inner.total_fired += 1;
            expired.push(ExpiredTimer {
                handle: entry.handle,
                callback: entry.callback,
                data: entry.data,
                kind: entry.kind,
            });
        }

        for entry in rearmed {
            inner.heap.push(HeapEntry(entry));
        }
        if inner.live.is_empty() {
            inner.heap.clear();
        }
        expired
    }

    fn next_deadline(&self) -> Option<Instant> {
        // May report a cancelled entry's deadline; the extra wakeup is harmless
        self.lock().heap.peek().map(|e| e.0.deadline)
    }

    fn len(&self) -> usize {
        self.lock().live.len()
    }

    fn clear(&self) -> usize {
        let mut inner = self.lock();
        let n = inner.live.len();
        inner.total_cancelled += n as u64;
        inner.live.clear();
        inner.heap.clear();
        n
    }

    fn name(&self) -> &'static str {
        "binary_heap"
    }
}

#[derive(Debug, Clone)]
pub struct HeapTimerStats {
    /// Pending, not cancelled
    pub active: usize,
    /// Cancelled but still in the heap
    pub pending_cancellations: usize,
    pub total_inserted: u64,
    pub total_fired: u64,
    pub total_cancelled: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timer::TimerKind;
    use mcsched_core::{HandlerResult, Message};
    use std::time::Duration;

    fn cb(_: &mut Message) -> HandlerResult {
        Ok(())
    }

    fn at(now: Instant, ms: u64, data: u32) -> TimerEntry {
        TimerEntry::at(now + Duration::from_millis(ms), cb, data, TimerKind::OneShot)
    }

    #[test]
    fn test_insert_and_poll() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        backend.insert(at(now, 0, 42));
        assert_eq!(backend.len(), 1);

        let expired = backend.poll_expired(now + Duration::from_millis(1));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].data, 42);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_ordering() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        backend.insert(at(now, 30, 3));
        backend.insert(at(now, 10, 1));
        backend.insert(at(now, 20, 2));

        let expired = backend.poll_expired(now + Duration::from_millis(50));
        let order: Vec<u32> = expired.iter().map(|e| e.data).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn test_not_yet_due() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        backend.insert(at(now, 100, 1));
        assert!(backend.poll_expired(now).is_empty());
        assert_eq!(backend.next_deadline(), Some(now + Duration::from_millis(100)));
    }

    #[test]
    fn test_cancel() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        let handle = backend.insert(at(now, 1000, 42));
        assert!(backend.cancel(handle));
        assert!(!backend.cancel(handle));
        assert_eq!(backend.len(), 0);
        assert!(backend.poll_expired(now + Duration::from_secs(2)).is_empty());
    }

    #[test]
    fn test_cancel_after_fire_is_false() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        let handle = backend.insert(at(now, 0, 1));
        assert_eq!(backend.poll_expired(now + Duration::from_millis(1)).len(), 1);
        assert!(!backend.cancel(handle));
    }

    #[test]
    fn test_periodic_rearms_until_cancelled() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        let handle = backend.insert(TimerEntry::at(
            now,
            cb,
            7,
            TimerKind::Periodic { interval: Duration::from_millis(10) },
        ));

        assert_eq!(backend.poll_expired(now).len(), 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.poll_expired(now + Duration::from_millis(10)).len(), 1);
        assert_eq!(backend.len(), 1);

        assert!(backend.cancel(handle));
        assert!(backend.poll_expired(now + Duration::from_secs(1)).is_empty());
        assert_eq!(backend.stats().pending_cancellations, 0);
    }

    #[test]
    fn test_stats_and_clear() {
        let backend = HeapTimerBackend::new();
        let now = Instant::now();
        backend.insert(at(now, 0, 1));
        let h2 = backend.insert(at(now, 10_000, 2));
        backend.insert(at(now, 20_000, 3));
        backend.poll_expired(now + Duration::from_millis(1));
        backend.cancel(h2);

        let stats = backend.stats();
        assert_eq!(stats.total_inserted, 3);
        assert_eq!(stats.total_fired, 1);
        assert_eq!(stats.total_cancelled, 1);
        assert_eq!(stats.active, 1);

        assert_eq!(backend.clear(), 1);
        assert!(backend.is_empty());
        assert!(backend.next_deadline().is_none());
    }
}
