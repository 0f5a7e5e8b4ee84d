//! Envelope slot layout
//!
//! An envelope is one slot of the pool arena. It wraps a message with the
//! routing data the scheduler needs and records which stage of its life
//! it is in, so a slot can be proven to have exactly one owner.

use crate::constants::ENVELOPE_COOKIE;
use crate::id::ModuleId;
use crate::message::Message;

/// Ownership stage of an envelope slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SlotState {
    /// On the pool free list
    Free = 0,
    /// Taken by a producer and being filled, not yet queued
    Filled = 1,
    /// Holds a message and sits on a destination queue
    Queued = 2,
    /// Taken off its queue by the controller or a flush
    Dispatching = 3,
}

/// One pool slot
#[derive(Debug)]
pub struct Envelope {
    /// `ENVELOPE_COOKIE` while the slot is away from the free list, zero otherwise
    pub(crate) cookie: u16,
    pub(crate) state: SlotState,
    pub(crate) dest: ModuleId,
    pub(crate) high_priority: bool,
    /// Post sequence number, monotonically increasing per pool
    pub(crate) seq: u64,
    pub(crate) msg: Option<Message>,
}

impl Envelope {
    pub(crate) const fn empty() -> Self {
        Envelope {
            cookie: 0,
            state: SlotState::Free,
            dest: ModuleId::NONE,
            high_priority: false,
            seq: 0,
            msg: None,
        }
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn dest(&self) -> ModuleId {
        self.dest
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[inline]
    pub fn is_high_priority(&self) -> bool {
        self.high_priority
    }

    /// Cookie is consistent with the ownership stage
    #[inline]
    pub(crate) fn cookie_ok(&self) -> bool {
        match self.state {
            SlotState::Free => self.cookie == 0,
            _ => self.cookie == ENVELOPE_COOKIE,
        }
    }

    pub(crate) fn reset(&mut self) {
        *self = Envelope::empty();
    }
}
