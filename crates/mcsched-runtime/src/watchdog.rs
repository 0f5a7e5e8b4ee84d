//! Handler watchdog
//!
//! The controller arms the watchdog before each handler call and disarms
//! it afterwards. A separate thread sleeps until the armed deadline; if
//! the same arming is still active when it wakes, a `StallReport` is
//! sent to the sink, once per arming. Reporting happens with the state
//! lock released, so a slow sink never delays the next disarm.
//!
//! The stall policy decides what follows a report. A panic on the
//! watchdog thread would only kill the watchdog, so `Panic` escalates
//! to an abort like `Abort` does.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mcsched_core::{FaultPolicy, Handler, ModuleId, SchedError, SchedResult, StallReport, StallSink};
use tracing::{debug, error};

/// Stall sink that logs at error level
pub struct LogStallSink;

impl StallSink for LogStallSink {
    fn report(&self, r: &StallReport) {
        error!(
            module = %r.module,
            queue = r.queue_index,
            handler = %r.handler,
            msg_type = r.msg_type,
            callback = ?r.callback_addr,
            elapsed_ms = r.elapsed.as_millis() as u64,
            "{}",
            r
        );
    }
}

/// What is currently running on the controller
#[derive(Clone)]
pub struct ArmInfo {
    pub module: ModuleId,
    pub queue_index: usize,
    pub handler: Arc<dyn Handler>,
    pub msg_type: u16,
    pub callback_addr: Option<usize>,
    pub seq: u64,
}

struct Armed {
    info: ArmInfo,
    started: Instant,
    generation: u64,
    reported: bool,
}

#[derive(Default)]
struct WatchState {
    armed: Option<Armed>,
    generation: u64,
    idle_waiting: bool,
    shutdown: bool,
}

struct WatchShared {
    state: Mutex<WatchState>,
    cond: Condvar,
    budget: Duration,
    policy: FaultPolicy,
    sink: Arc<dyn StallSink>,
    stalls: AtomicU64,
}

impl WatchShared {
    fn lock(&self) -> MutexGuard<'_, WatchState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Watchdog {
    shared: Arc<WatchShared>,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Construct without starting the thread
    pub fn new(budget: Duration, policy: FaultPolicy, sink: Arc<dyn StallSink>) -> Self {
        Watchdog {
            shared: Arc::new(WatchShared {
                state: Mutex::new(WatchState::default()),
                cond: Condvar::new(),
                budget,
                policy,
                sink,
                stalls: AtomicU64::new(0),
            }),
            thread: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_some()
    }

    /// Stalls reported since construction
    pub fn stall_count(&self) -> u64 {
        self.shared.stalls.load(Ordering::Relaxed)
    }

    pub fn start(&mut self) -> SchedResult<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        {
            let mut st = self.shared.lock();
            st.shutdown = false;
            st.armed = None;
        }
        let shared = self.shared.clone();
        let handle = thread::Builder::new()
            .name("mc_watchdog".into())
            .spawn(move || watchdog_loop(shared))
            .map_err(|_| SchedError::SpawnFailed("watchdog"))?;
        self.thread = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        let Some(handle) = self.thread.take() else {
            return;
        };
        {
            let mut st = self.shared.lock();
            st.shutdown = true;
            st.armed = None;
        }
        self.shared.cond.notify_all();
        if handle.join().is_err() {
            error!("watchdog thread panicked");
        }
    }

    /// Handle used by the controller to arm and disarm
    pub fn arm_handle(&self) -> WatchdogArm {
        WatchdogArm {
            shared: self.shared.clone(),
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Controller-side arm/disarm
#[derive(Clone)]
pub struct WatchdogArm {
    shared: Arc<WatchShared>,
}

impl WatchdogArm {
    pub fn arm(&self, info: ArmInfo) {
        let mut st = self.shared.lock();
        st.generation = st.generation.wrapping_add(1);
        let generation = st.generation;
        st.armed = Some(Armed {
            info,
            started: Instant::now(),
            generation,
            reported: false,
        });
        let wake = st.idle_waiting;
        drop(st);
        if wake {
            self.shared.cond.notify_one();
        }
    }

    /// Disarm; returns whether the run was reported as a stall
    pub fn disarm(&self) -> bool {
        let mut st = self.shared.lock();
        st.armed.take().map(|a| a.reported).unwrap_or(false)
    }
}

fn watchdog_loop(shared: Arc<WatchShared>) {
    debug!(budget_ms = shared.budget.as_millis() as u64, "watchdog started");
    let mut st = shared.lock();
    loop {
        if st.shutdown {
            break;
        }
        let pending = match st.armed.as_ref() {
            Some(a) if !a.reported => Some((a.started + shared.budget, a.generation)),
            _ => None,
        };
        let Some((deadline, generation)) = pending else {
            st.idle_waiting = true;
            st = shared.cond.wait(st).unwrap_or_else(PoisonError::into_inner);
            st.idle_waiting = false;
            continue;
        };

        let now = Instant::now();
        if now < deadline {
            st = shared
                .cond
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
            continue;
        }

        let report = match st.armed.as_mut() {
            Some(a) if a.generation == generation => {
                a.reported = true;
                StallReport {
                    module: a.info.module,
                    queue_index: a.info.queue_index,
                    handler: a.info.handler.name().to_string(),
                    msg_type: a.info.msg_type,
                    callback_addr: a.info.callback_addr,
                    seq: a.info.seq,
                    elapsed: now - a.started,
                    budget: shared.budget,
                }
            }
            _ => continue,
        };
        drop(st);

        shared.stalls.fetch_add(1, Ordering::Relaxed);
        shared.sink.report(&report);
        if shared.policy != FaultPolicy::LogOnly {
            FaultPolicy::Abort.raise(format_args!("{}", report));
        }

        st = shared.lock();
    }
    debug!("watchdog stopped");
}
