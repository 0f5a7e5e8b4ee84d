//! Handlers for the scheduler's own queues
//!
//! - `SYS`: timer expirations and system probes, always callback-carrying
//! - `TARGET_IF`: umbrella; runs the message callback when there is one,
//!   otherwise passes the message to the installed legacy handler
//! - `OS_IF`: callback-only

use std::sync::Arc;

use mcsched_core::constants::{SYS_MSG_ID_MC_PROBE, SYS_MSG_ID_MC_TIMER};
use mcsched_core::{
    CallbackHandler, Handler, HandlerError, HandlerResult, Message, ModuleId, SpinLock,
};

use crate::completion::Completion;

/// Slot holding the legacy firmware-command handler
#[derive(Default)]
pub struct LegacySlot {
    handler: SpinLock<Option<Arc<dyn Handler>>>,
}

impl LegacySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `handler` only if the slot is empty; hands it back otherwise
    pub fn install(&self, handler: Arc<dyn Handler>) -> Result<(), Arc<dyn Handler>> {
        let mut slot = self.handler.lock();
        if slot.is_some() {
            return Err(handler);
        }
        *slot = Some(handler);
        Ok(())
    }

    pub fn clear(&self) -> Option<Arc<dyn Handler>> {
        self.handler.lock().take()
    }

    pub fn get(&self) -> Option<Arc<dyn Handler>> {
        self.handler.lock().clone()
    }
}

pub struct SysHandler;

impl Handler for SysHandler {
    fn handle(&self, msg: &mut Message) -> HandlerResult {
        match msg.msg_type {
            SYS_MSG_ID_MC_TIMER | SYS_MSG_ID_MC_PROBE => msg.invoke_callback(),
            _ if msg.has_callback() => msg.invoke_callback(),
            other => Err(HandlerError::Unsupported(other)),
        }
    }

    fn name(&self) -> &str {
        "sys"
    }
}

/// Callback carried by SYS probes; acknowledges the waiting prober
pub(crate) fn probe_ack(msg: &mut Message) -> HandlerResult {
    match msg.body_ref::<Arc<Completion>>() {
        Some(ack) => {
            ack.complete();
            Ok(())
        }
        None => Err(HandlerError::BadBody(msg.msg_type)),
    }
}

pub struct UmbrellaHandler {
    legacy: Arc<LegacySlot>,
}

impl UmbrellaHandler {
    pub fn new(legacy: Arc<LegacySlot>) -> Self {
        UmbrellaHandler { legacy }
    }
}

impl Handler for UmbrellaHandler {
    fn handle(&self, msg: &mut Message) -> HandlerResult {
        if msg.has_callback() {
            return msg.invoke_callback();
        }
        match self.legacy.get() {
            Some(h) => h.handle(msg),
            None => Err(HandlerError::NoLegacyHandler),
        }
    }

    fn name(&self) -> &str {
        "target_if"
    }
}

/// Built-in registrations, in registration order
pub fn builtin_handlers(legacy: Arc<LegacySlot>) -> [(ModuleId, Arc<dyn Handler>); 3] {
    let sys: Arc<dyn Handler> = Arc::new(SysHandler);
    let umbrella: Arc<dyn Handler> = Arc::new(UmbrellaHandler::new(legacy));
    let os_if: Arc<dyn Handler> = Arc::new(CallbackHandler::new("os_if"));
    [
        (ModuleId::SYS, sys),
        (ModuleId::TARGET_IF, umbrella),
        (ModuleId::OS_IF, os_if),
    ]
}
