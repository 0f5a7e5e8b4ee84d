//! Scheduler context and lifecycle
//!
//! `Scheduler` owns everything: envelope pool, queue table, registry,
//! event word, controller thread, watchdog and timers. There is no global
//! instance; construct as many independent schedulers as needed.
//!
//! # Lifecycle
//!
//! - `init`: pool, queues, event word and handshakes, watchdog (not
//!   started), built-in registrations, in that order. A failure drops
//!   whatever was already built.
//! - `enable`: start the watchdog, spawn the controller thread and wait
//!   for it to report in, start the timer thread.
//! - `disable`: stop timers, refuse new posts, signal shutdown, join the
//!   controller, stop the watchdog, then flush every queue on the calling
//!   thread, running each flush callback once.
//! - `deinit`: disable if needed, then release everything.
//!
//! # Posting
//!
//! Any thread may `post`. The path is: validate, apply redirect rules,
//! resolve the queue index, check that posts are accepted, take an
//! envelope, fill it, push it under the queue lock (re-checking that posts
//! are still accepted), set POST. Nothing on this path blocks on the
//! controller or allocates. An unregistered destination is reported as
//! such in every lifecycle state; a registered one is refused with
//! `ShuttingDown` unless the scheduler is enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use mcsched_core::constants::{MAX_QUEUES, SYS_MSG_ID_MC_PROBE, SYS_MSG_ID_MC_TIMER};
use mcsched_core::pool::PoolStats;
use mcsched_core::{
    ControllerState, EnvelopePool, FnHandler, Handler, HandlerResult, LifecycleState, Message,
    MessageCallback, ModuleId, MsgQueue, SchedError, SchedResult, SpinLock, StallSink, StateCell,
};
use tracing::{debug, error, info, trace, warn};

use crate::builtin::{builtin_handlers, probe_ack, LegacySlot};
use crate::completion::Completion;
use crate::config::SchedulerConfig;
use crate::controller;
use crate::event::{bits, new_event, EventWord};
use crate::history::{DispatchRecord, MessageHistory};
use crate::registry::{apply_redirect, ModuleRegistry};
use crate::stats::{SchedStats, StatsSnapshot};
use crate::timer::{ExpiredTimer, TimerHandle, TimerService, TimerThreadConfig};
use crate::watchdog::{LogStallSink, Watchdog, WatchdogArm};

/// State shared with the controller and timer threads
pub(crate) struct Inner {
    pub(crate) pool: EnvelopePool,
    pub(crate) queues: Box<[MsgQueue]>,
    pub(crate) registry: ModuleRegistry,
    pub(crate) legacy: Arc<LegacySlot>,
    pub(crate) event: Box<dyn EventWord>,
    pub(crate) started: Completion,
    pub(crate) parked: Completion,
    pub(crate) exited: Completion,
    pub(crate) accepting: AtomicBool,
    /// Set when the owning `Scheduler` was dropped on the controller thread
    pub(crate) orphaned: AtomicBool,
    pub(crate) ctl_state: StateCell<ControllerState>,
    pub(crate) controller_thread: SpinLock<Option<ThreadId>>,
    pub(crate) watchdog_arm: WatchdogArm,
    pub(crate) history: MessageHistory,
    pub(crate) stats: SchedStats,
}

impl Inner {
    pub(crate) fn post(&self, dest: ModuleId, mut msg: Message, high_priority: bool) -> SchedResult<()> {
        let result = self.try_post(dest, &mut msg, high_priority);
        if let Err(e) = &result {
            self.stats.on_rejected(e);
            trace!(dest = %dest, error = %e, "post rejected");
        }
        result
    }

    fn try_post(&self, dest: ModuleId, msg: &mut Message, high_priority: bool) -> SchedResult<()> {
        if !dest.is_valid() {
            return Err(SchedError::InvalidArgument("destination out of range"));
        }

        let target = apply_redirect(dest, msg);
        let qidx = self.registry.resolve(target)?;
        if !self.accepting.load(Ordering::Acquire) {
            return Err(SchedError::ShuttingDown);
        }
        let id = self.pool.acquire()?;
        let seq = match self.pool.store(id, target, std::mem::take(msg), high_priority) {
            Ok(seq) => seq,
            Err(e) => {
                let _ = self.pool.release(id);
                return Err(e);
            }
        };

        let admitted = self.queues[qidx].push_if(id, high_priority, || {
            self.accepting.load(Ordering::Acquire)
        });
        if !admitted {
            // Dropped with the envelope; the poster sees ShuttingDown
            let _ = self.pool.release(id);
            return Err(SchedError::ShuttingDown);
        }

        self.event.set(bits::POST);
        self.stats.on_posted(high_priority, target != dest);
        trace!(dest = %target, queue = qidx, seq, high_priority, "posted");
        Ok(())
    }

    pub(crate) fn fire_timer(&self, timer: ExpiredTimer) {
        let msg = Message::new(SYS_MSG_ID_MC_TIMER)
            .with_callback(timer.callback)
            .with_body_val(timer.data);
        match self.post(ModuleId::SYS, msg, false) {
            Ok(()) => self.stats.on_timer_fired(),
            Err(e) => warn!(timer = timer.handle.raw(), error = %e, "failed to post timer expiry"),
        }
    }

    /// Discard everything still queued; caller guarantees nothing else drains
    pub(crate) fn flush_queues(&self) -> u64 {
        let mut flushed = 0u64;
        for (qidx, queue) in self.queues.iter().enumerate() {
            for id in queue.drain() {
                match self.pool.checkout(id) {
                    Ok(mut c) => {
                        c.msg.flush();
                        flushed += 1;
                    }
                    Err(e) => {
                        self.stats.on_integrity_fault();
                        error!(envelope = %id, queue = qidx, error = %e, "corrupt envelope during flush");
                    }
                }
                if let Err(e) = self.pool.release(id) {
                    self.stats.on_integrity_fault();
                    error!(envelope = %id, error = %e, "failed to release envelope during flush");
                }
            }
        }
        self.stats.on_flushed(flushed);
        flushed
    }

    fn on_controller_thread(&self) -> bool {
        *self.controller_thread.lock() == Some(thread::current().id())
    }
}

struct Lifecycle {
    controller: Option<JoinHandle<()>>,
    watchdog: Watchdog,
}

/// Main-controller message scheduler
pub struct Scheduler {
    inner: Arc<Inner>,
    config: SchedulerConfig,
    state: StateCell<LifecycleState>,
    lifecycle: Mutex<Lifecycle>,
    timers: TimerService,
}

impl Scheduler {
    /// Build a scheduler with the logging stall sink
    pub fn init(config: SchedulerConfig) -> SchedResult<Self> {
        Self::with_stall_sink(config, Arc::new(LogStallSink))
    }

    /// Build from `SchedulerConfig::from_env()`
    pub fn from_env() -> SchedResult<Self> {
        Self::init(SchedulerConfig::from_env())
    }

    /// Build a scheduler that sends stall reports to `sink`
    pub fn with_stall_sink(config: SchedulerConfig, sink: Arc<dyn StallSink>) -> SchedResult<Self> {
        config.validate()?;

        let pool = EnvelopePool::new(
            config.pool_capacity,
            config.exhaustion_threshold,
            config.exhaustion_policy,
        )?;
        let queues: Box<[MsgQueue]> = (0..MAX_QUEUES)
            .map(|_| MsgQueue::new(config.pool_capacity))
            .collect();
        let event = new_event();
        let watchdog = Watchdog::new(config.watchdog_timeout, config.stall_policy, sink);

        let legacy = Arc::new(LegacySlot::new());
        let registry = ModuleRegistry::new();
        for (module, handler) in builtin_handlers(legacy.clone()) {
            registry.register(module, handler)?;
        }

        let inner = Arc::new(Inner {
            pool,
            queues,
            registry,
            legacy,
            event,
            started: Completion::new(),
            parked: Completion::new(),
            exited: Completion::new(),
            accepting: AtomicBool::new(false),
            orphaned: AtomicBool::new(false),
            ctl_state: StateCell::new(ControllerState::Idle),
            controller_thread: SpinLock::new(None),
            watchdog_arm: watchdog.arm_handle(),
            history: MessageHistory::new(config.history_size),
            stats: SchedStats::new(),
        });

        let timers = TimerService::new(TimerThreadConfig {
            max_sleep: config.timer_max_sleep,
            ..TimerThreadConfig::default()
        });

        info!(
            pool_capacity = config.pool_capacity,
            queues = MAX_QUEUES,
            watchdog_ms = config.watchdog_timeout.as_millis() as u64,
            "scheduler initialized"
        );

        Ok(Scheduler {
            inner,
            config,
            state: StateCell::new(LifecycleState::Initialized),
            lifecycle: Mutex::new(Lifecycle {
                controller: None,
                watchdog,
            }),
            timers,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn controller_state(&self) -> ControllerState {
        self.inner.ctl_state.get()
    }

    // ---------------------------------------------------------------------
    // Registration
    // ---------------------------------------------------------------------

    /// Give `module` a queue served by `handler`
    pub fn register_module(&self, module: ModuleId, handler: Arc<dyn Handler>) -> SchedResult<()> {
        let name = handler.name().to_string();
        let qidx = self.inner.registry.register(module, handler)?;
        debug!(module = %module, queue = qidx, handler = %name, "module registered");
        Ok(())
    }

    /// Register a closure as the handler for `module`
    pub fn register_fn<F>(&self, module: ModuleId, name: &'static str, f: F) -> SchedResult<()>
    where
        F: Fn(&mut Message) -> HandlerResult + Send + Sync + 'static,
    {
        self.register_module(module, Arc::new(FnHandler::new(name, f)))
    }

    /// Release the queue owned by `module`
    ///
    /// Envelopes already queued for it are flushed when the controller
    /// reaches them.
    pub fn deregister_module(&self, module: ModuleId) -> SchedResult<()> {
        let reg = self.inner.registry.deregister(module)?;
        debug!(module = %module, handler = reg.handler.name(), "module deregistered");
        Ok(())
    }

    pub fn is_registered(&self, module: ModuleId) -> bool {
        self.inner.registry.is_registered(module)
    }

    /// (module, queue index) pairs in dispatch order
    pub fn registered_modules(&self) -> Vec<(ModuleId, usize)> {
        self.inner.registry.registered()
    }

    /// Install the handler for funnelled legacy firmware messages
    pub fn register_legacy_handler(&self, handler: Arc<dyn Handler>) -> SchedResult<()> {
        let name = handler.name().to_string();
        if self.inner.legacy.install(handler).is_err() {
            return Err(SchedError::AlreadyRegistered(ModuleId::LEGACY_WMA));
        }
        debug!(handler = %name, "legacy handler registered");
        Ok(())
    }

    pub fn deregister_legacy_handler(&self) -> SchedResult<()> {
        match self.inner.legacy.clear() {
            Some(_) => {
                debug!("legacy handler deregistered");
                Ok(())
            }
            None => Err(SchedError::NotRegistered(ModuleId::LEGACY_WMA)),
        }
    }

    // ---------------------------------------------------------------------
    // Posting
    // ---------------------------------------------------------------------

    /// Queue `msg` for `dest`
    ///
    /// A priority post is delivered before every normal envelope already
    /// queued for `dest`, after every priority envelope already queued.
    /// Never blocks. On error the message is dropped without running its
    /// flush callback.
    pub fn post(&self, dest: ModuleId, msg: Message, high_priority: bool) -> SchedResult<()> {
        self.inner.post(dest, msg, high_priority)
    }

    /// Check that the controller is dispatching
    ///
    /// Posts a probe to the SYS queue and waits up to `timeout` for the
    /// controller to run it. Returns the round-trip time. A suspended
    /// controller never answers, so the probe times out.
    pub fn probe(&self, timeout: Duration) -> SchedResult<Duration> {
        if self.inner.on_controller_thread() {
            return Err(SchedError::InvalidState("probe called from the controller thread"));
        }
        let ack = Arc::new(Completion::new());
        let msg = Message::new(SYS_MSG_ID_MC_PROBE)
            .with_callback(probe_ack)
            .with_body(ack.clone());
        let started = Instant::now();
        self.inner.post(ModuleId::SYS, msg, false)?;
        if ack.wait_timeout(timeout) {
            let rtt = started.elapsed();
            debug!(rtt_us = rtt.as_micros() as u64, "probe answered");
            Ok(rtt)
        } else {
            warn!(timeout_ms = timeout.as_millis() as u64, "controller did not answer probe");
            Err(SchedError::Timeout("probe"))
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Start the controller thread and accept posts
    pub fn enable(&self) -> SchedResult<()> {
        if self.inner.on_controller_thread() {
            return Err(SchedError::InvalidState("enable called from the controller thread"));
        }
        let mut lc = self.lock_lifecycle();
        match self.state.get() {
            LifecycleState::Initialized | LifecycleState::Disabled => {}
            LifecycleState::Running | LifecycleState::Suspended => {
                return Err(SchedError::InvalidState("already enabled"))
            }
            LifecycleState::Deinitialized => return Err(SchedError::InvalidState("deinitialized")),
        }

        let inner = &self.inner;
        inner.event.take(bits::ALL);
        inner.started.reinit();
        inner.parked.reinit();
        inner.exited.reinit();

        lc.watchdog.start()?;
        inner.accepting.store(true, Ordering::Release);

        let mut builder = thread::Builder::new().name(self.config.thread_name.clone());
        if let Some(size) = self.config.stack_size {
            builder = builder.stack_size(size);
        }
        let thread_inner = inner.clone();
        let handle = match builder.spawn(move || controller::run(thread_inner)) {
            Ok(h) => h,
            Err(e) => {
                inner.accepting.store(false, Ordering::Release);
                lc.watchdog.stop();
                error!(error = %e, "failed to spawn controller thread");
                return Err(SchedError::SpawnFailed("controller"));
            }
        };
        inner.started.wait();
        lc.controller = Some(handle);
        self.state.set(LifecycleState::Running);

        let timer_inner = inner.clone();
        if let Err(e) = self.timers.start(move |t| timer_inner.fire_timer(t)) {
            error!(error = %e, "failed to start timer thread");
            self.shutdown_locked(&mut lc);
            return Err(e);
        }

        info!(thread = %self.config.thread_name, "scheduler enabled");
        Ok(())
    }

    /// Stop the controller thread and flush every queue
    pub fn disable(&self) -> SchedResult<()> {
        if self.inner.on_controller_thread() {
            return Err(SchedError::InvalidState("disable called from the controller thread"));
        }
        let mut lc = self.lock_lifecycle();
        if !self.state.get().is_enabled() {
            return Err(SchedError::InvalidState("not enabled"));
        }
        self.shutdown_locked(&mut lc);
        Ok(())
    }

    /// Park the controller after its current drain cycle
    ///
    /// Posts are still accepted and queued while suspended.
    pub fn suspend(&self) -> SchedResult<()> {
        if self.inner.on_controller_thread() {
            return Err(SchedError::InvalidState("suspend called from the controller thread"));
        }
        let _lc = self.lock_lifecycle();
        match self.state.get() {
            LifecycleState::Running => {}
            LifecycleState::Suspended => return Ok(()),
            _ => return Err(SchedError::InvalidState("not running")),
        }
        self.inner.parked.reinit();
        self.inner.event.set(bits::SUSPEND);
        self.inner.parked.wait();
        self.state.set(LifecycleState::Suspended);
        info!("scheduler suspended");
        Ok(())
    }

    pub fn resume(&self) -> SchedResult<()> {
        if self.inner.on_controller_thread() {
            return Err(SchedError::InvalidState("resume called from the controller thread"));
        }
        let _lc = self.lock_lifecycle();
        if self.state.get() != LifecycleState::Suspended {
            return Err(SchedError::InvalidState("not suspended"));
        }
        self.inner.event.set(bits::RESUME);
        self.state.set(LifecycleState::Running);
        info!("scheduler resumed");
        Ok(())
    }

    /// Disable if needed and release all resources
    pub fn deinit(self) -> SchedResult<()> {
        if self.state.get().is_enabled() {
            self.disable()?;
        }
        let in_use = self.inner.pool.in_use();
        if in_use > 0 {
            warn!(in_use, "envelopes still outstanding at deinit");
        }
        self.state.set(LifecycleState::Deinitialized);
        info!("scheduler deinitialized");
        Ok(())
    }

    fn shutdown_locked(&self, lc: &mut Lifecycle) {
        let inner = &self.inner;
        self.timers.stop();

        inner.accepting.store(false, Ordering::SeqCst);
        inner.event.set(bits::SHUTDOWN);
        inner.exited.wait();
        if let Some(handle) = lc.controller.take() {
            if handle.join().is_err() {
                error!("controller thread panicked");
            }
        }
        *inner.controller_thread.lock() = None;
        lc.watchdog.stop();

        let flushed = inner.flush_queues();
        self.state.set(LifecycleState::Disabled);
        info!(flushed, available = inner.pool.available(), "scheduler disabled");
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ---------------------------------------------------------------------
    // Timers
    // ---------------------------------------------------------------------

    /// Run `callback` on the controller thread after `delay`
    ///
    /// The callback receives a message whose `body_val` is `data`.
    pub fn start_timer(&self, delay: Duration, callback: MessageCallback, data: u32) -> SchedResult<TimerHandle> {
        self.require_enabled()?;
        Ok(self.timers.start_timer(delay, callback, data))
    }

    /// Run `callback` on the controller thread every `interval`
    pub fn start_periodic_timer(
        &self,
        interval: Duration,
        callback: MessageCallback,
        data: u32,
    ) -> SchedResult<TimerHandle> {
        if interval.is_zero() {
            return Err(SchedError::InvalidArgument("periodic interval must be > 0"));
        }
        self.require_enabled()?;
        Ok(self.timers.start_periodic(interval, callback, data))
    }

    /// Cancel a pending timer; false if it already fired or was stopped
    ///
    /// An expiry already posted to the controller still runs.
    pub fn stop_timer(&self, handle: TimerHandle) -> bool {
        self.timers.stop_timer(handle)
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.pending()
    }

    fn require_enabled(&self) -> SchedResult<()> {
        if self.state.get().is_enabled() {
            Ok(())
        } else {
            Err(SchedError::InvalidState("not enabled"))
        }
    }

    // ---------------------------------------------------------------------
    // Introspection
    // ---------------------------------------------------------------------

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn pool_available(&self) -> usize {
        self.inner.pool.available()
    }

    /// Envelopes waiting on the queue owned by `module`
    pub fn queue_depth(&self, module: ModuleId) -> SchedResult<usize> {
        let qidx = self.inner.registry.resolve(module)?;
        Ok(self.inner.queues[qidx].len())
    }

    /// Recent dispatches, oldest first
    pub fn history(&self) -> Vec<DispatchRecord> {
        self.inner.history.snapshot()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.state.get().is_enabled() {
            return;
        }
        if self.inner.on_controller_thread() {
            // The controller cannot join itself; it exits and flushes once
            // the running handler returns.
            warn!("scheduler dropped on its own controller thread, detaching it");
            self.inner.accepting.store(false, Ordering::SeqCst);
            self.inner.orphaned.store(true, Ordering::SeqCst);
            self.inner.event.set(bits::SHUTDOWN);
            return;
        }
        if let Err(e) = self.disable() {
            error!(error = %e, "disable on drop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::DispatchOutcome;
    use mcsched_core::{FaultPolicy, HandlerError, StallReport};
    use std::sync::atomic::{AtomicUsize, Ordering};

    const A: ModuleId = ModuleId::new(10);
    const B: ModuleId = ModuleId::new(11);

    fn test_config() -> SchedulerConfig {
        SchedulerConfig::new()
            .pool_capacity(256)
            .exhaustion_policy(FaultPolicy::LogOnly)
            .watchdog_timeout(Duration::from_secs(5))
            .thread_name("mc_test")
    }

    fn enabled(config: SchedulerConfig) -> Scheduler {
        let s = Scheduler::init(config).unwrap();
        s.enable().unwrap();
        s
    }

    type Log = Arc<Mutex<Vec<u32>>>;

    fn recorder(s: &Scheduler, module: ModuleId) -> Log {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        s.register_fn(module, "recorder", move |m: &mut Message| {
            sink.lock().unwrap().push(m.body_val);
            Ok(())
        })
        .unwrap();
        log
    }

    fn val(v: u32) -> Message {
        Message::new(1).with_body_val(v)
    }

    fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn drained(s: &Scheduler) -> bool {
        let cap = s.config().pool_capacity;
        wait_until(Duration::from_secs(5), || s.pool_available() == cap)
    }

    fn count_flush(msg: &mut Message) {
        if let Some(c) = msg.body_ref::<Arc<AtomicUsize>>() {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn flushable(counter: &Arc<AtomicUsize>) -> Message {
        Message::new(2)
            .with_body(counter.clone())
            .with_flush_callback(count_flush)
    }

    #[test]
    fn test_enable_disable_without_posts() {
        let s = Scheduler::init(test_config()).unwrap();
        assert_eq!(s.state(), LifecycleState::Initialized);
        s.enable().unwrap();
        assert_eq!(s.state(), LifecycleState::Running);
        s.disable().unwrap();
        assert_eq!(s.state(), LifecycleState::Disabled);
        assert_eq!(s.controller_state(), ControllerState::Stopped);
        assert_eq!(s.pool_available(), 256);
        s.deinit().unwrap();
    }

    #[test]
    fn test_builtin_queues_registered_in_order() {
        let s = Scheduler::init(test_config()).unwrap();
        assert_eq!(
            s.registered_modules(),
            vec![(ModuleId::SYS, 0), (ModuleId::TARGET_IF, 1), (ModuleId::OS_IF, 2)]
        );
        assert_eq!(
            s.register_fn(ModuleId::SYS, "dup", |_: &mut Message| Ok(())),
            Err(SchedError::AlreadyRegistered(ModuleId::SYS))
        );
    }

    #[test]
    fn test_lifecycle_state_errors() {
        let s = Scheduler::init(test_config()).unwrap();
        assert_eq!(s.disable(), Err(SchedError::InvalidState("not enabled")));
        assert_eq!(s.resume(), Err(SchedError::InvalidState("not suspended")));
        s.enable().unwrap();
        assert_eq!(s.enable(), Err(SchedError::InvalidState("already enabled")));
        s.disable().unwrap();
    }

    #[test]
    fn test_fifo_per_destination() {
        let s = enabled(test_config());
        let log = recorder(&s, A);
        for i in 0..100 {
            s.post(A, val(i), false).unwrap();
        }
        assert!(drained(&s));
        assert_eq!(*log.lock().unwrap(), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_priority_jumps_normal_posts() {
        let s = enabled(test_config());
        let a = recorder(&s, A);
        let _b = recorder(&s, B);
        s.suspend().unwrap();
        s.post(A, val(1), false).unwrap();
        s.post(A, val(2), false).unwrap();
        s.post(A, val(3), false).unwrap();
        s.post(A, val(100), true).unwrap();
        assert_eq!(s.queue_depth(A).unwrap(), 4);
        s.resume().unwrap();
        assert!(drained(&s));
        assert_eq!(*a.lock().unwrap(), vec![100, 1, 2, 3]);
    }

    #[test]
    fn test_priority_posts_keep_their_order() {
        let s = enabled(test_config());
        let a = recorder(&s, A);
        s.suspend().unwrap();
        s.post(A, val(1), false).unwrap();
        s.post(A, val(10), true).unwrap();
        s.post(A, val(11), true).unwrap();
        s.post(A, val(2), false).unwrap();
        s.resume().unwrap();
        assert!(drained(&s));
        assert_eq!(*a.lock().unwrap(), vec![10, 11, 1, 2]);
    }

    #[test]
    fn test_unregistered_destination() {
        let s = enabled(test_config());
        assert_eq!(s.post(A, val(1), false), Err(SchedError::NotRegistered(A)));
        let _log = recorder(&s, A);
        s.post(A, val(1), false).unwrap();
        s.deregister_module(A).unwrap();
        assert_eq!(s.post(A, val(2), false), Err(SchedError::NotRegistered(A)));
        assert_eq!(s.deregister_module(A), Err(SchedError::NotRegistered(A)));
        assert!(s.stats().rejected_not_registered >= 2);
    }

    #[test]
    fn test_invalid_destination() {
        let s = enabled(test_config());
        assert!(matches!(
            s.post(ModuleId::new(500), val(1), false),
            Err(SchedError::InvalidArgument(_))
        ));
        assert!(matches!(
            s.post(ModuleId::NONE, val(1), false),
            Err(SchedError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_reregistration_routes_to_new_handler() {
        let s = enabled(test_config());
        let first = recorder(&s, A);
        s.deregister_module(A).unwrap();
        let second = recorder(&s, A);
        for i in 0..10 {
            s.post(A, val(i), false).unwrap();
        }
        assert!(drained(&s));
        assert!(first.lock().unwrap().is_empty());
        assert_eq!(second.lock().unwrap().len(), 10);
    }

    #[test]
    fn test_stale_envelopes_are_flushed_not_misdelivered() {
        let s = enabled(test_config());
        let _a = recorder(&s, A);
        let flushed = Arc::new(AtomicUsize::new(0));
        s.suspend().unwrap();
        s.post(A, flushable(&flushed), false).unwrap();
        s.post(A, flushable(&flushed), false).unwrap();
        s.deregister_module(A).unwrap();
        // B takes over the queue slot A released
        let b = recorder(&s, B);
        s.resume().unwrap();
        assert!(drained(&s));
        assert!(b.lock().unwrap().is_empty());
        assert_eq!(flushed.load(Ordering::SeqCst), 2);
        assert_eq!(s.stats().stale, 2);
    }

    #[test]
    fn test_pool_exhaustion_and_recovery() {
        let s = enabled(test_config().pool_capacity(64));
        let log = recorder(&s, A);
        s.suspend().unwrap();
        let mut resources = 0;
        for i in 0..1000 {
            match s.post(A, val(i), false) {
                Ok(()) => {}
                Err(SchedError::Resources) => resources += 1,
                Err(e) => panic!("unexpected error {e}"),
            }
        }
        assert_eq!(resources, 1000 - 64);
        assert_eq!(s.pool_available(), 0);
        assert_eq!(s.stats().rejected_resources, resources as u64);

        s.resume().unwrap();
        assert!(drained(&s));
        assert_eq!(*log.lock().unwrap(), (0..64).collect::<Vec<_>>());

        s.post(A, val(5000), false).unwrap();
        assert!(drained(&s));
        assert_eq!(log.lock().unwrap().last(), Some(&5000));
        assert_eq!(s.pool_stats().recoveries, 1);
    }

    #[test]
    fn test_unregistered_reported_in_every_state() {
        let s = Scheduler::init(test_config()).unwrap();
        let stray = ModuleId::new(20);
        assert_eq!(s.post(stray, val(1), false), Err(SchedError::NotRegistered(stray)));

        let _a = recorder(&s, A);
        assert_eq!(s.post(A, val(1), false), Err(SchedError::ShuttingDown));

        s.enable().unwrap();
        s.disable().unwrap();
        assert_eq!(s.post(stray, val(2), false), Err(SchedError::NotRegistered(stray)));
        assert_eq!(s.post(A, val(2), false), Err(SchedError::ShuttingDown));

        let stats = s.stats();
        assert_eq!(stats.rejected_not_registered, 2);
        assert_eq!(stats.rejected_shutting_down, 2);
    }

    #[test]
    fn test_flood_faster_than_drain() {
        // Library defaults apart from the pool size
        let s = enabled(SchedulerConfig::new().pool_capacity(64));
        s.register_fn(A, "slow", |_: &mut Message| {
            thread::sleep(Duration::from_micros(200));
            Ok(())
        })
        .unwrap();
        let mut resources = 0;
        for i in 0..1000 {
            if let Err(e) = s.post(A, val(i), false) {
                assert_eq!(e, SchedError::Resources);
                resources += 1;
            }
        }
        assert!(resources >= 1);
        assert!(drained(&s));
        s.disable().unwrap();
        assert_eq!(s.pool_available(), 64);
    }

    #[test]
    #[should_panic(expected = "scheduler fault")]
    fn test_sustained_exhaustion_escalates() {
        let s = enabled(
            test_config()
                .pool_capacity(4)
                .exhaustion_threshold(5)
                .exhaustion_policy(FaultPolicy::Panic),
        );
        let _a = recorder(&s, A);
        s.suspend().unwrap();
        for i in 0..4 {
            s.post(A, val(i), false).unwrap();
        }
        for i in 0..4 {
            assert_eq!(s.post(A, val(i), false), Err(SchedError::Resources));
        }
        let _ = s.post(A, val(99), false);
    }

    #[test]
    fn test_disable_flushes_each_envelope_once() {
        let s = enabled(test_config());
        let _a = recorder(&s, A);
        let _b = recorder(&s, B);
        let flushed = Arc::new(AtomicUsize::new(0));
        s.suspend().unwrap();
        for _ in 0..20 {
            s.post(A, flushable(&flushed), false).unwrap();
            s.post(B, flushable(&flushed), true).unwrap();
        }
        s.disable().unwrap();
        assert_eq!(flushed.load(Ordering::SeqCst), 40);
        assert_eq!(s.stats().flushed, 40);
        assert_eq!(s.pool_available(), 256);
        assert_eq!(s.queue_depth(A).unwrap(), 0);
    }

    #[test]
    fn test_post_after_disable_rejected() {
        let s = enabled(test_config());
        let _a = recorder(&s, A);
        s.disable().unwrap();
        assert_eq!(s.post(A, val(1), false), Err(SchedError::ShuttingDown));
        assert_eq!(s.stats().rejected_shutting_down, 1);
    }

    #[test]
    fn test_reenable_after_disable() {
        let s = enabled(test_config());
        let log = recorder(&s, A);
        s.post(A, val(1), false).unwrap();
        assert!(drained(&s));
        s.disable().unwrap();
        s.enable().unwrap();
        s.post(A, val(2), false).unwrap();
        assert!(drained(&s));
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_handler_failures_do_not_stop_dispatch() {
        let s = enabled(test_config());
        s.register_fn(A, "flaky", |m: &mut Message| match m.body_val {
            1 => Err(HandlerError::failed("bad input")),
            2 => panic!("handler blew up"),
            _ => Ok(()),
        })
        .unwrap();
        let b = recorder(&s, B);
        s.suspend().unwrap();
        s.post(A, val(1), false).unwrap();
        s.post(A, val(2), false).unwrap();
        s.post(A, val(3), false).unwrap();
        s.post(B, val(9), false).unwrap();
        s.resume().unwrap();
        assert!(drained(&s));
        assert_eq!(*b.lock().unwrap(), vec![9]);

        let stats = s.stats();
        assert_eq!(stats.handler_errors, 1);
        assert_eq!(stats.handler_panics, 1);
        assert_eq!(stats.dispatched, 4);

        let outcomes: Vec<_> = s.history().iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![
                DispatchOutcome::Failed("failed"),
                DispatchOutcome::Panicked,
                DispatchOutcome::Handled,
                DispatchOutcome::Handled,
            ]
        );
    }

    fn legacy_marker(msg: &mut Message) -> HandlerResult {
        msg.body_val = 999;
        Ok(())
    }

    #[test]
    fn test_legacy_funnel() {
        let s = enabled(test_config());
        assert!(matches!(
            s.register_fn(ModuleId::LEGACY_WMA, "wma", |_: &mut Message| Ok(())),
            Err(SchedError::InvalidArgument(_))
        ));

        let seen: Log = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        s.register_legacy_handler(Arc::new(FnHandler::new("wma", move |m: &mut Message| {
            sink.lock().unwrap().push(m.body_val);
            Ok(())
        })))
        .unwrap();
        assert!(matches!(
            s.register_legacy_handler(Arc::new(FnHandler::new("wma2", |_: &mut Message| Ok(())))),
            Err(SchedError::AlreadyRegistered(_))
        ));

        // callback is cleared, so the legacy handler sees the original value
        s.post(ModuleId::LEGACY_WMA, val(7).with_callback(legacy_marker), false)
            .unwrap();
        assert!(drained(&s));
        assert_eq!(*seen.lock().unwrap(), vec![7]);
        assert_eq!(s.stats().redirected, 1);

        s.deregister_legacy_handler().unwrap();
        assert_eq!(
            s.deregister_legacy_handler(),
            Err(SchedError::NotRegistered(ModuleId::LEGACY_WMA))
        );
        s.post(ModuleId::LEGACY_WMA, val(8), false).unwrap();
        assert!(drained(&s));
        assert_eq!(s.stats().handler_errors, 1);
    }

    static OS_IF_HITS: AtomicUsize = AtomicUsize::new(0);

    fn os_if_callback(msg: &mut Message) -> HandlerResult {
        OS_IF_HITS.fetch_add(msg.body_val as usize, Ordering::SeqCst);
        Ok(())
    }

    #[test]
    fn test_callback_queues() {
        let s = enabled(test_config());
        s.post(ModuleId::OS_IF, val(3).with_callback(os_if_callback), false)
            .unwrap();
        s.post(ModuleId::TARGET_IF, val(4).with_callback(os_if_callback), false)
            .unwrap();
        assert!(drained(&s));
        assert_eq!(OS_IF_HITS.load(Ordering::SeqCst), 7);
    }

    struct CollectStalls(Mutex<Vec<StallReport>>);

    impl StallSink for CollectStalls {
        fn report(&self, r: &StallReport) {
            self.0.lock().unwrap().push(r.clone());
        }
    }

    #[test]
    fn test_watchdog_reports_slow_handler() {
        let sink = Arc::new(CollectStalls(Mutex::new(Vec::new())));
        let config = test_config().watchdog_timeout(Duration::from_millis(30));
        let s = Scheduler::with_stall_sink(config, sink.clone()).unwrap();
        s.enable().unwrap();
        s.register_fn(A, "sleepy", |_: &mut Message| {
            thread::sleep(Duration::from_millis(150));
            Ok(())
        })
        .unwrap();
        let fast = recorder(&s, B);

        s.post(A, Message::new(0x77), false).unwrap();
        s.post(B, val(1), false).unwrap();
        assert!(drained(&s));

        let reports = sink.0.lock().unwrap().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].module, A);
        assert_eq!(reports[0].handler, "sleepy");
        assert_eq!(reports[0].msg_type, 0x77);
        assert_eq!(s.stats().stalls, 1);
        assert_eq!(*fast.lock().unwrap(), vec![1]);
    }

    static TIMER_ON_CONTROLLER: AtomicUsize = AtomicUsize::new(0);

    fn timer_callback(msg: &mut Message) -> HandlerResult {
        if thread::current().name() == Some("mc_timer_test") && msg.msg_type == SYS_MSG_ID_MC_TIMER {
            TIMER_ON_CONTROLLER.fetch_add(msg.body_val as usize, Ordering::SeqCst);
        }
        Ok(())
    }

    #[test]
    fn test_timer_runs_on_controller_thread() {
        let s = enabled(test_config().thread_name("mc_timer_test"));
        s.start_timer(Duration::from_millis(10), timer_callback, 5).unwrap();
        let stopped = s.start_timer(Duration::from_millis(200), timer_callback, 1000).unwrap();
        assert!(s.stop_timer(stopped));
        assert!(wait_until(Duration::from_secs(2), || {
            TIMER_ON_CONTROLLER.load(Ordering::SeqCst) == 5
        }));
        thread::sleep(Duration::from_millis(250));
        assert_eq!(TIMER_ON_CONTROLLER.load(Ordering::SeqCst), 5);
        assert!(s.stats().timers_fired >= 1);
    }

    static PERIODIC_HITS: AtomicUsize = AtomicUsize::new(0);

    fn periodic_callback(_: &mut Message) -> HandlerResult {
        PERIODIC_HITS.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    #[test]
    fn test_periodic_timer_and_disable_cancels() {
        let s = Scheduler::init(test_config()).unwrap();
        assert!(matches!(
            s.start_timer(Duration::from_millis(1), periodic_callback, 0),
            Err(SchedError::InvalidState(_))
        ));
        s.enable().unwrap();
        assert!(matches!(
            s.start_periodic_timer(Duration::ZERO, periodic_callback, 0),
            Err(SchedError::InvalidArgument(_))
        ));
        s.start_periodic_timer(Duration::from_millis(10), periodic_callback, 0)
            .unwrap();
        assert!(wait_until(Duration::from_secs(2), || {
            PERIODIC_HITS.load(Ordering::SeqCst) >= 3
        }));
        s.disable().unwrap();
        assert_eq!(s.pending_timers(), 0);
        let after = PERIODIC_HITS.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(PERIODIC_HITS.load(Ordering::SeqCst), after);
    }

    #[test]
    fn test_suspend_queues_posts_until_resume() {
        let s = enabled(test_config());
        let log = recorder(&s, A);
        s.suspend().unwrap();
        assert_eq!(s.state(), LifecycleState::Suspended);
        assert_eq!(s.controller_state(), ControllerState::Suspended);
        s.suspend().unwrap();
        for i in 0..5 {
            s.post(A, val(i), false).unwrap();
        }
        thread::sleep(Duration::from_millis(30));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(s.queue_depth(A).unwrap(), 5);
        s.resume().unwrap();
        assert!(drained(&s));
        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[test]
    fn test_disable_while_suspended() {
        let s = enabled(test_config());
        let _a = recorder(&s, A);
        let flushed = Arc::new(AtomicUsize::new(0));
        s.suspend().unwrap();
        s.post(A, flushable(&flushed), false).unwrap();
        s.disable().unwrap();
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(s.state(), LifecycleState::Disabled);
    }

    #[test]
    fn test_drop_disables_and_flushes() {
        let flushed = Arc::new(AtomicUsize::new(0));
        {
            let s = enabled(test_config());
            let _a = recorder(&s, A);
            s.suspend().unwrap();
            s.post(A, flushable(&flushed), false).unwrap();
            s.post(A, flushable(&flushed), false).unwrap();
        }
        assert_eq!(flushed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let s = Arc::new(enabled(test_config().pool_capacity(4000)));
        let log = recorder(&s, A);
        let producers: Vec<_> = (0..4u32)
            .map(|p| {
                let s = s.clone();
                thread::spawn(move || {
                    for i in 0..500u32 {
                        let v = p * 10_000 + i;
                        while let Err(e) = s.post(A, val(v), false) {
                            assert_eq!(e, SchedError::Resources);
                            thread::yield_now();
                        }
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }
        assert!(wait_until(Duration::from_secs(10), || log.lock().unwrap().len() == 2000));
        let seen = log.lock().unwrap().clone();
        for p in 0..4u32 {
            let mine: Vec<u32> = seen.iter().copied().filter(|v| v / 10_000 == p).collect();
            assert_eq!(mine, (0..500).map(|i| p * 10_000 + i).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_handler_can_post_and_lifecycle_calls_are_refused() {
        let s = Arc::new(enabled(test_config()));
        let b = recorder(&s, B);
        let weak = Arc::downgrade(&s);
        let refused = Arc::new(AtomicUsize::new(0));
        let refused2 = refused.clone();
        s.register_fn(A, "relay", move |m: &mut Message| {
            if let Some(s) = weak.upgrade() {
                if matches!(s.disable(), Err(SchedError::InvalidState(_))) {
                    refused2.fetch_add(1, Ordering::SeqCst);
                }
                s.post(B, Message::new(1).with_body_val(m.body_val + 1), false)
                    .map_err(|e| HandlerError::failed(e.to_string()))?;
            }
            Ok(())
        })
        .unwrap();
        s.post(A, val(41), false).unwrap();
        assert!(wait_until(Duration::from_secs(5), || b.lock().unwrap().len() == 1));
        assert_eq!(*b.lock().unwrap(), vec![42]);
        assert_eq!(refused.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_round_trip() {
        let s = Scheduler::init(test_config()).unwrap();
        assert_eq!(s.probe(Duration::from_millis(10)), Err(SchedError::ShuttingDown));

        s.enable().unwrap();
        assert!(s.probe(Duration::from_secs(5)).is_ok());

        s.suspend().unwrap();
        assert_eq!(
            s.probe(Duration::from_millis(20)),
            Err(SchedError::Timeout("probe"))
        );
        s.resume().unwrap();
        assert!(drained(&s));
        assert!(s.probe(Duration::from_secs(5)).is_ok());
        assert!(s.history().iter().all(|r| r.outcome == DispatchOutcome::Handled));
    }

    #[test]
    fn test_drop_from_handler_stops_controller() {
        let s = Arc::new(enabled(test_config()));
        let inner = s.inner.clone();
        let flushed = Arc::new(AtomicUsize::new(0));
        let owner: Arc<Mutex<Option<Arc<Scheduler>>>> = Arc::new(Mutex::new(None));
        let taken = owner.clone();
        s.register_fn(A, "last_owner", move |_: &mut Message| {
            drop(taken.lock().unwrap().take());
            Ok(())
        })
        .unwrap();

        s.suspend().unwrap();
        s.post(A, val(1), false).unwrap();
        s.post(A, flushable(&flushed), false).unwrap();
        // The handler now holds the only reference
        *owner.lock().unwrap() = Some(s);
        owner.lock().unwrap().as_ref().unwrap().resume().unwrap();

        assert!(wait_until(Duration::from_secs(5), || {
            inner.ctl_state.get() == ControllerState::Stopped
        }));
        assert!(owner.lock().unwrap().is_none());
        assert!(!inner.accepting.load(Ordering::SeqCst));
        assert_eq!(flushed.load(Ordering::SeqCst), 1);
        assert_eq!(inner.pool.available(), 256);
        assert_eq!(
            inner.post(A, val(2), false),
            Err(SchedError::ShuttingDown)
        );
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(matches!(
            Scheduler::init(SchedulerConfig::new().pool_capacity(0)),
            Err(SchedError::InvalidConfig(_))
        ));
    }
}
