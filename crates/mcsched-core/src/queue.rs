//! Per-destination message queue
//!
//! FIFO of envelope ids with a priority head: priority entries sit in
//! front of every normal entry and keep FIFO order among themselves.
//! Storage is reserved up front for the pool capacity, so pushes never
//! reallocate.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::VecDeque;

use crate::id::EnvelopeId;
use crate::spinlock::SpinLock;

struct QueueInner {
    entries: VecDeque<EnvelopeId>,
    /// Leading entries of `entries` that were posted with priority
    priority_len: usize,
}

/// Queue of envelopes for one destination
pub struct MsgQueue {
    inner: SpinLock<QueueInner>,
    /// Mirror of `entries.len()` readable without the lock
    len: AtomicUsize,
}

impl MsgQueue {
    pub fn new(capacity: usize) -> Self {
        MsgQueue {
            inner: SpinLock::new(QueueInner {
                entries: VecDeque::with_capacity(capacity),
                priority_len: 0,
            }),
            len: AtomicUsize::new(0),
        }
    }

    /// Enqueue unconditionally
    pub fn push(&self, id: EnvelopeId, high_priority: bool) {
        self.push_if(id, high_priority, || true);
    }

    /// Enqueue only if `admit` returns true while the queue lock is held
    ///
    /// Lets the caller check a shutdown flag atomically with the insert,
    /// so nothing lands on a queue after it has been flushed.
    pub fn push_if(&self, id: EnvelopeId, high_priority: bool, admit: impl FnOnce() -> bool) -> bool {
        let mut q = self.inner.lock();
        if !admit() {
            return false;
        }
        if high_priority {
            let at = q.priority_len;
            q.entries.insert(at, id);
            q.priority_len += 1;
        } else {
            q.entries.push_back(id);
        }
        self.len.store(q.entries.len(), Ordering::Release);
        true
    }

    /// Dequeue the head
    pub fn pop(&self) -> Option<EnvelopeId> {
        let mut q = self.inner.lock();
        let id = q.entries.pop_front()?;
        if q.priority_len > 0 {
            q.priority_len -= 1;
        }
        self.len.store(q.entries.len(), Ordering::Release);
        Some(id)
    }

    /// Remove every entry, in delivery order
    pub fn drain(&self) -> Vec<EnvelopeId> {
        let mut q = self.inner.lock();
        q.priority_len = 0;
        let out: Vec<_> = q.entries.drain(..).collect();
        self.len.store(0, Ordering::Release);
        out
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(q: &MsgQueue) -> Vec<u32> {
        core::iter::from_fn(|| q.pop()).map(|id| id.as_u32()).collect()
    }

    #[test]
    fn test_fifo() {
        let q = MsgQueue::new(8);
        for i in 0..4 {
            q.push(EnvelopeId::new(i), false);
        }
        assert_eq!(q.len(), 4);
        assert_eq!(ids(&q), vec![0, 1, 2, 3]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_priority_ahead_of_normal_and_fifo_among_priority() {
        let q = MsgQueue::new(8);
        q.push(EnvelopeId::new(1), false);
        q.push(EnvelopeId::new(2), false);
        q.push(EnvelopeId::new(10), true);
        q.push(EnvelopeId::new(11), true);
        q.push(EnvelopeId::new(3), false);
        assert_eq!(ids(&q), vec![10, 11, 1, 2, 3]);
    }

    #[test]
    fn test_priority_after_partial_drain() {
        let q = MsgQueue::new(8);
        q.push(EnvelopeId::new(10), true);
        q.push(EnvelopeId::new(1), false);
        assert_eq!(q.pop(), Some(EnvelopeId::new(10)));
        q.push(EnvelopeId::new(11), true);
        q.push(EnvelopeId::new(12), true);
        assert_eq!(ids(&q), vec![11, 12, 1]);
    }

    #[test]
    fn test_push_if_rejects() {
        let q = MsgQueue::new(2);
        assert!(!q.push_if(EnvelopeId::new(0), false, || false));
        assert!(q.is_empty());
        assert!(q.push_if(EnvelopeId::new(0), false, || true));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_drain_preserves_order() {
        let q = MsgQueue::new(4);
        q.push(EnvelopeId::new(1), false);
        q.push(EnvelopeId::new(9), true);
        let drained: Vec<u32> = q.drain().into_iter().map(|i| i.as_u32()).collect();
        assert_eq!(drained, vec![9, 1]);
        assert!(q.is_empty());
        q.push(EnvelopeId::new(2), true);
        assert_eq!(ids(&q), vec![2]);
    }
}
