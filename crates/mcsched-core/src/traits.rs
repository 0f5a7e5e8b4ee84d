//! Capability traits at the scheduler seams
//!
//! - `Handler`: processing logic a module registers for its queue
//! - `StallSink`: receiver of watchdog stall reports

use core::fmt;
use std::time::Duration;

use crate::error::HandlerResult;
use crate::id::ModuleId;
use crate::message::Message;

/// Processing logic for one destination
///
/// Called on the controller thread, one message at a time, never while a
/// scheduler lock is held. The handler takes ownership of the body by
/// `take`-ing it from the message; whatever is left when the call returns
/// is dropped by the scheduler.
pub trait Handler: Send + Sync {
    fn handle(&self, msg: &mut Message) -> HandlerResult;

    /// Name used in logs and stall reports
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapts a closure into a `Handler`
pub struct FnHandler<F> {
    name: &'static str,
    f: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&mut Message) -> HandlerResult + Send + Sync,
{
    pub fn new(name: &'static str, f: F) -> Self {
        FnHandler { name, f }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut Message) -> HandlerResult + Send + Sync,
{
    #[inline]
    fn handle(&self, msg: &mut Message) -> HandlerResult {
        (self.f)(msg)
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Handler that runs the message's own callback
///
/// Used by destinations whose messages are always callback-carrying.
pub struct CallbackHandler {
    name: &'static str,
}

impl CallbackHandler {
    pub const fn new(name: &'static str) -> Self {
        CallbackHandler { name }
    }
}

impl Handler for CallbackHandler {
    fn handle(&self, msg: &mut Message) -> HandlerResult {
        msg.invoke_callback()
    }

    fn name(&self) -> &str {
        self.name
    }
}

/// Diagnostic context for a handler that overran its budget
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StallReport {
    pub module: ModuleId,
    pub queue_index: usize,
    pub handler: String,
    pub msg_type: u16,
    pub callback_addr: Option<usize>,
    pub seq: u64,
    pub elapsed: Duration,
    pub budget: Duration,
}

impl fmt::Display for StallReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler '{}' for module {} (queue {}) exceeded its allotted time: {:?} > {:?}, msg_type {:#06x}",
            self.handler, self.module, self.queue_index, self.elapsed, self.budget, self.msg_type
        )?;
        if let Some(addr) = self.callback_addr {
            write!(f, ", callback {:#x}", addr)?;
        }
        Ok(())
    }
}

/// Receiver of stall reports
///
/// Called from the watchdog thread. Reporting must not block dispatch.
pub trait StallSink: Send + Sync {
    fn report(&self, report: &StallReport);
}

impl<F> StallSink for F
where
    F: Fn(&StallReport) + Send + Sync,
{
    fn report(&self, report: &StallReport) {
        self(report)
    }
}
