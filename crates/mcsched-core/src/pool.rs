//! Fixed-capacity envelope pool
//!
//! All envelopes are allocated once at construction. Posting takes a free
//! slot, the controller (or a flush) returns it. When the free list runs
//! dry the post fails with `SchedError::Resources`; a warning is logged
//! once per exhaustion burst and recovery is logged when a slot is
//! obtained again. A burst that outlasts the configured threshold is
//! escalated through `FaultPolicy`.
//!
//! Slot ownership is tracked per envelope (`SlotState`). Every transition
//! checks the previous stage, so a double release or a dispatch of a
//! free slot is reported as `SchedError::Integrity` instead of corrupting
//! the free list. A live envelope found on the free list is skipped and
//! comes back when its owner releases it; a free one with a bad cookie is
//! reset and returned to the free list.

use core::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use crossbeam_queue::ArrayQueue;
use tracing::{error, info, warn};

use crate::constants::{DEFAULT_EXHAUSTION_THRESHOLD, ENVELOPE_COOKIE};
use crate::envelope::{Envelope, SlotState};
use crate::error::{SchedError, SchedResult};
use crate::fault::FaultPolicy;
use crate::id::{EnvelopeId, ModuleId};
use crate::message::Message;
use crate::spinlock::SpinLock;

/// Contents of an envelope taken off a queue
#[derive(Debug)]
pub struct Checkout {
    pub id: EnvelopeId,
    pub dest: ModuleId,
    pub seq: u64,
    pub msg: Message,
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    pub available: usize,
    /// Failed acquisitions since creation
    pub exhausted_total: u64,
    /// Consecutive failed acquisitions in the current burst
    pub exhausted_streak: u32,
    /// Number of bursts that ended with a successful acquisition
    pub recoveries: u64,
    /// Free-list entries rejected by the integrity check on acquire
    pub integrity_skips: u64,
}

/// Pre-allocated envelope arena with a lock-free free list
pub struct EnvelopePool {
    slots: Box<[SpinLock<Envelope>]>,
    free: ArrayQueue<u32>,
    next_seq: AtomicU64,

    threshold: u32,
    policy: FaultPolicy,
    streak: AtomicU32,
    burst_warned: AtomicBool,
    exhausted_total: AtomicU64,
    recoveries: AtomicU64,
    integrity_skips: AtomicU64,
}

impl EnvelopePool {
    /// Create a pool of `capacity` envelopes
    ///
    /// `threshold` is the number of consecutive failed acquisitions that
    /// triggers `policy`; zero selects `DEFAULT_EXHAUSTION_THRESHOLD`.
    pub fn new(capacity: usize, threshold: u32, policy: FaultPolicy) -> SchedResult<Self> {
        if capacity == 0 || capacity > u32::MAX as usize {
            return Err(SchedError::InvalidArgument("pool capacity"));
        }

        let slots: Box<[SpinLock<Envelope>]> = (0..capacity)
            .map(|_| SpinLock::new(Envelope::empty()))
            .collect();
        let free = ArrayQueue::new(capacity);
        for i in 0..capacity as u32 {
            // Cannot fail: queue capacity equals slot count
            let _ = free.push(i);
        }

        let threshold = if threshold == 0 {
            DEFAULT_EXHAUSTION_THRESHOLD
        } else {
            threshold
        };

        Ok(EnvelopePool {
            slots,
            free,
            next_seq: AtomicU64::new(0),
            threshold,
            policy,
            streak: AtomicU32::new(0),
            burst_warned: AtomicBool::new(false),
            exhausted_total: AtomicU64::new(0),
            recoveries: AtomicU64::new(0),
            integrity_skips: AtomicU64::new(0),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Free envelopes right now
    #[inline]
    pub fn available(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn in_use(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn exhaustion_threshold(&self) -> u32 {
        self.threshold
    }

    /// Take a free envelope for a producer
    pub fn acquire(&self) -> SchedResult<EnvelopeId> {
        let Some(raw) = self.free.pop() else {
            return Err(self.on_exhausted());
        };

        let streak = self.streak.swap(0, Ordering::AcqRel);
        if streak > 0 {
            self.burst_warned.store(false, Ordering::Release);
            self.recoveries.fetch_add(1, Ordering::Relaxed);
            info!(failed_posts = streak, "envelope pool recovered");
        }

        let id = EnvelopeId::new(raw);
        let mut slot = self.slot(id)?.lock();
        if slot.state != SlotState::Free {
            // The owner pushes this index back on release
            let state = slot.state;
            drop(slot);
            self.integrity_skips.fetch_add(1, Ordering::Relaxed);
            error!(envelope = %id, ?state, "free list held a live envelope, skipping it");
            return Err(SchedError::Integrity("free list held a live envelope"));
        }
        if !slot.cookie_ok() {
            slot.reset();
            drop(slot);
            self.integrity_skips.fetch_add(1, Ordering::Relaxed);
            if self.free.push(raw).is_err() {
                error!(envelope = %id, "free list full while returning a repaired envelope");
            }
            error!(envelope = %id, "free envelope had a bad cookie, reset it");
            return Err(SchedError::Integrity("free envelope cookie mismatch"));
        }
        slot.state = SlotState::Filled;
        slot.cookie = ENVELOPE_COOKIE;
        Ok(id)
    }

    /// Load a message into a filled envelope and mark it queued
    ///
    /// The caller must push `id` onto the destination queue next.
    pub fn store(
        &self,
        id: EnvelopeId,
        dest: ModuleId,
        msg: Message,
        high_priority: bool,
    ) -> SchedResult<u64> {
        let mut slot = self.slot(id)?.lock();
        if slot.state != SlotState::Filled || !slot.cookie_ok() {
            return Err(SchedError::Integrity("store into unfilled envelope"));
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        slot.state = SlotState::Queued;
        slot.dest = dest;
        slot.high_priority = high_priority;
        slot.seq = seq;
        slot.msg = Some(msg);
        Ok(seq)
    }

    /// Take the message out of a queued envelope
    ///
    /// The slot moves to `Dispatching` and must be returned with `release`.
    pub fn checkout(&self, id: EnvelopeId) -> SchedResult<Checkout> {
        let mut slot = self.slot(id)?.lock();
        if slot.state != SlotState::Queued || !slot.cookie_ok() {
            return Err(SchedError::Integrity("checkout of envelope that is not queued"));
        }
        let msg = slot
            .msg
            .take()
            .ok_or(SchedError::Integrity("queued envelope without message"))?;
        slot.state = SlotState::Dispatching;
        Ok(Checkout {
            id,
            dest: slot.dest,
            seq: slot.seq,
            msg,
        })
    }

    /// Return an envelope to the free list
    ///
    /// Valid from `Filled`, `Queued` (an abandoned post) or `Dispatching`.
    /// Any message still held is returned to the caller.
    pub fn release(&self, id: EnvelopeId) -> SchedResult<Option<Message>> {
        let leftover = {
            let mut slot = self.slot(id)?.lock();
            if slot.state == SlotState::Free {
                return Err(SchedError::Integrity("double release"));
            }
            if !slot.cookie_ok() {
                return Err(SchedError::Integrity("envelope cookie mismatch"));
            }
            let msg = slot.msg.take();
            slot.reset();
            msg
        };
        if self.free.push(id.as_u32()).is_err() {
            return Err(SchedError::Integrity("free list overflow"));
        }
        Ok(leftover)
    }

    /// Ownership stage of a slot, for diagnostics
    pub fn state_of(&self, id: EnvelopeId) -> Option<SlotState> {
        self.slots.get(id.as_usize()).map(|s| s.lock().state)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity(),
            available: self.available(),
            exhausted_total: self.exhausted_total.load(Ordering::Relaxed),
            exhausted_streak: self.streak.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            integrity_skips: self.integrity_skips.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn slot(&self, id: EnvelopeId) -> SchedResult<&SpinLock<Envelope>> {
        self.slots
            .get(id.as_usize())
            .ok_or(SchedError::Integrity("envelope id out of range"))
    }

    #[cold]
    fn on_exhausted(&self) -> SchedError {
        self.exhausted_total.fetch_add(1, Ordering::Relaxed);
        let streak = self.streak.fetch_add(1, Ordering::AcqRel).saturating_add(1);

        if !self.burst_warned.swap(true, Ordering::AcqRel) {
            warn!(
                capacity = self.capacity(),
                "envelope pool exhausted, posts fail until envelopes are released"
            );
        }
        if streak == self.threshold {
            self.policy.raise(format_args!(
                "envelope pool exhausted for {} consecutive posts (capacity {})",
                streak,
                self.capacity()
            ));
        }
        SchedError::Resources
    }
}
