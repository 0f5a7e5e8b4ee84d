//! Module registry
//!
//! Maps a destination id to the index of the queue it owns and the
//! handler that processes that queue. Queue indexes are assigned at
//! registration time (lowest free slot) and returned on deregistration.
//! Envelopes already queued stay where they are; the controller
//! discards them if the slot has a different owner by the time they are
//! dispatched.
//!
//! Redirect rules rewrite a destination before lookup. The only rule is
//! `LEGACY_FUNNEL`: legacy firmware-command messages go to the umbrella
//! `TARGET_IF` queue with their callback cleared, so the umbrella hands
//! them to the legacy handler.

use std::sync::Arc;

use mcsched_core::constants::{MAX_MODULES, MAX_QUEUES, NO_QUEUE};
use mcsched_core::{Handler, Message, ModuleId, SchedError, SchedResult, SpinLock};

/// Destination rewrite applied at post time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectRule {
    pub from: ModuleId,
    pub to: ModuleId,
    /// Drop the message callback so the target falls back to its legacy path
    pub clear_callback: bool,
}

/// Legacy firmware commands are served by the umbrella queue
pub const LEGACY_FUNNEL: RedirectRule = RedirectRule {
    from: ModuleId::LEGACY_WMA,
    to: ModuleId::TARGET_IF,
    clear_callback: true,
};

const REDIRECTS: &[RedirectRule] = &[LEGACY_FUNNEL];

/// Rule whose source is `dest`, if any
pub fn redirect_for(dest: ModuleId) -> Option<&'static RedirectRule> {
    REDIRECTS.iter().find(|r| r.from == dest)
}

/// Rewrite `dest` (and `msg`) through the redirect table
pub fn apply_redirect(dest: ModuleId, msg: &mut Message) -> ModuleId {
    match redirect_for(dest) {
        Some(rule) => {
            if rule.clear_callback {
                msg.callback = None;
            }
            rule.to
        }
        None => dest,
    }
}

/// Active owner of a queue slot
#[derive(Clone)]
pub struct Registration {
    pub module: ModuleId,
    pub handler: Arc<dyn Handler>,
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("module", &self.module)
            .field("handler", &self.handler.name())
            .finish()
    }
}

struct RegistryTable {
    qidx_of: [u8; MAX_MODULES],
    slots: [Option<Registration>; MAX_QUEUES],
}

/// Destination id to (queue index, handler) table
pub struct ModuleRegistry {
    table: SpinLock<RegistryTable>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry {
            table: SpinLock::new(RegistryTable {
                qidx_of: [NO_QUEUE; MAX_MODULES],
                slots: std::array::from_fn(|_| None),
            }),
        }
    }

    /// Claim the lowest free queue slot for `module`
    pub fn register(&self, module: ModuleId, handler: Arc<dyn Handler>) -> SchedResult<usize> {
        if !module.is_valid() {
            return Err(SchedError::InvalidArgument("module id out of range"));
        }
        if redirect_for(module).is_some() {
            return Err(SchedError::InvalidArgument("module id is a redirect source"));
        }

        let mut t = self.table.lock();
        if t.qidx_of[module.as_usize()] != NO_QUEUE {
            return Err(SchedError::AlreadyRegistered(module));
        }
        let qidx = t
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(SchedError::TableFull(MAX_QUEUES))?;
        t.slots[qidx] = Some(Registration { module, handler });
        t.qidx_of[module.as_usize()] = qidx as u8;
        Ok(qidx)
    }

    /// Release the queue slot owned by `module`
    ///
    /// Returns the removed registration; its handler is dropped by the
    /// caller, outside the registry lock.
    pub fn deregister(&self, module: ModuleId) -> SchedResult<Registration> {
        if !module.is_valid() {
            return Err(SchedError::InvalidArgument("module id out of range"));
        }
        let mut t = self.table.lock();
        let qidx = t.qidx_of[module.as_usize()];
        if qidx == NO_QUEUE {
            return Err(SchedError::NotRegistered(module));
        }
        t.qidx_of[module.as_usize()] = NO_QUEUE;
        t.slots[qidx as usize]
            .take()
            .ok_or(SchedError::Integrity("registry index points at an empty slot"))
    }

    /// Queue index owned by `module`
    #[inline]
    pub fn resolve(&self, module: ModuleId) -> SchedResult<usize> {
        if !module.is_valid() {
            return Err(SchedError::InvalidArgument("module id out of range"));
        }
        match self.table.lock().qidx_of[module.as_usize()] {
            NO_QUEUE => Err(SchedError::NotRegistered(module)),
            q => Ok(q as usize),
        }
    }

    /// Current owner of queue slot `qidx`
    #[inline]
    pub fn registration_at(&self, qidx: usize) -> Option<Registration> {
        self.table.lock().slots.get(qidx).and_then(|s| s.clone())
    }

    pub fn is_registered(&self, module: ModuleId) -> bool {
        self.resolve(module).is_ok()
    }

    /// (module, queue index) of every registration, in queue order
    pub fn registered(&self) -> Vec<(ModuleId, usize)> {
        let t = self.table.lock();
        t.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|r| (r.module, i)))
            .collect()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
