//! Controller thread
//!
//! The single consumer. Sleeps on the event word, and on each POST drains
//! every queue in index order, running handlers one at a time. Each queue
//! is drained of the entries visible when the cycle reached it; anything
//! posted meanwhile re-sets POST and is handled next cycle. SHUTDOWN is
//! checked before every message, and the loop exits without draining.
//! Flushing what is left is done by `Scheduler::disable` after the thread
//! has gone, or by the thread itself when its scheduler was dropped from
//! inside a handler.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use mcsched_core::constants::MAX_QUEUES;
use mcsched_core::{ControllerState, EnvelopeId, HandlerError};
use tracing::{debug, error, info, trace, warn};

use crate::event::bits;
use crate::history::{DispatchOutcome, DispatchRecord};
use crate::scheduler::Inner;
use crate::watchdog::ArmInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cycle {
    Completed,
    ShutdownRequested,
}

pub(crate) fn run(inner: Arc<Inner>) {
    *inner.controller_thread.lock() = Some(thread::current().id());
    inner.ctl_state.set(ControllerState::Idle);
    inner.started.complete();
    info!("controller thread started");

    loop {
        let ev = inner
            .event
            .wait_any(bits::POST | bits::SHUTDOWN | bits::SUSPEND, None);
        if ev & bits::SHUTDOWN != 0 {
            break;
        }

        if ev & bits::SUSPEND != 0 {
            inner.event.take(bits::SUSPEND);
            if park(&inner) == Cycle::ShutdownRequested {
                break;
            }
            continue;
        }

        if inner.event.take(bits::POST) != 0
            && drain_cycle(&inner) == Cycle::ShutdownRequested
        {
            break;
        }
        inner.ctl_state.set(ControllerState::Idle);
    }

    inner.ctl_state.set(ControllerState::ShuttingDown);
    if inner.orphaned.load(Ordering::SeqCst) {
        let flushed = inner.flush_queues();
        info!(flushed, "flushed queues of dropped scheduler");
    }
    info!("controller thread exiting");
    inner.ctl_state.set(ControllerState::Stopped);
    inner.parked.complete();
    inner.exited.complete();
}

/// Wait for RESUME or SHUTDOWN
fn park(inner: &Inner) -> Cycle {
    inner.ctl_state.set(ControllerState::Suspended);
    inner.parked.complete();
    debug!("controller suspended");
    let ev = inner.event.wait_any(bits::RESUME | bits::SHUTDOWN, None);
    inner.event.take(bits::RESUME);
    if ev & bits::SHUTDOWN != 0 {
        return Cycle::ShutdownRequested;
    }
    inner.ctl_state.set(ControllerState::Idle);
    debug!("controller resumed");
    Cycle::Completed
}

fn drain_cycle(inner: &Inner) -> Cycle {
    inner.ctl_state.set(ControllerState::Draining);
    for qidx in 0..MAX_QUEUES {
        let queue = &inner.queues[qidx];
        let visible = queue.len();
        for _ in 0..visible {
            if inner.event.load() & bits::SHUTDOWN != 0 {
                return Cycle::ShutdownRequested;
            }
            let Some(id) = queue.pop() else {
                break;
            };
            dispatch(inner, qidx, id);
        }
    }
    Cycle::Completed
}

fn dispatch(inner: &Inner, qidx: usize, id: EnvelopeId) {
    let checkout = match inner.pool.checkout(id) {
        Ok(c) => c,
        Err(e) => {
            inner.stats.on_integrity_fault();
            error!(envelope = %id, queue = qidx, error = %e, "dropping corrupt envelope");
            return;
        }
    };
    let mut msg = checkout.msg;
    let started = Instant::now();
    let msg_type = msg.msg_type;
    let had_callback = msg.has_callback();

    let owner = inner
        .registry
        .registration_at(qidx)
        .filter(|r| r.module == checkout.dest);

    let outcome = match owner {
        None => {
            inner.stats.on_stale();
            debug!(
                dest = %checkout.dest,
                queue = qidx,
                msg_type,
                "destination no longer owns queue, flushing envelope"
            );
            msg.flush();
            DispatchOutcome::Stale
        }
        Some(reg) => {
            inner.ctl_state.set(ControllerState::Dispatching);
            inner.watchdog_arm.arm(ArmInfo {
                module: reg.module,
                queue_index: qidx,
                handler: reg.handler.clone(),
                msg_type,
                callback_addr: msg.callback_addr(),
                seq: checkout.seq,
            });
            let result = panic::catch_unwind(AssertUnwindSafe(|| reg.handler.handle(&mut msg)));
            if inner.watchdog_arm.disarm() {
                inner.stats.on_stall();
            }
            inner.ctl_state.set(ControllerState::Draining);
            inner.stats.on_dispatched();

            match result {
                Ok(Ok(())) => {
                    trace!(module = %reg.module, msg_type, "dispatched");
                    DispatchOutcome::Handled
                }
                Ok(Err(e)) => {
                    inner.stats.on_handler_error();
                    warn!(
                        module = %reg.module,
                        handler = reg.handler.name(),
                        msg_type,
                        error = %e,
                        "handler failed"
                    );
                    DispatchOutcome::Failed(e.as_label())
                }
                Err(_) => {
                    inner.stats.on_handler_panic();
                    error!(
                        module = %reg.module,
                        handler = reg.handler.name(),
                        msg_type,
                        error = %HandlerError::Panicked,
                        "handler panicked"
                    );
                    DispatchOutcome::Panicked
                }
            }
        }
    };

    inner.history.record(DispatchRecord {
        seq: checkout.seq,
        module: checkout.dest,
        queue_index: qidx,
        msg_type,
        had_callback,
        started,
        duration: started.elapsed(),
        outcome,
    });

    drop(msg);
    if let Err(e) = inner.pool.release(id) {
        inner.stats.on_integrity_fault();
        error!(envelope = %id, error = %e, "failed to release envelope");
    }
}
