//! Timer API owned by the scheduler

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mcsched_core::{MessageCallback, SchedResult};

use super::worker::{spawn_timer_thread, TimerSignal, TimerStats, TimerThreadConfig, TimerThreadHandle};
use super::{ExpiredTimer, HeapTimerBackend, TimerBackend, TimerEntry, TimerHandle};

/// Timer backend plus the thread that services it
///
/// Timers can be scheduled at any time but only fire while the thread is
/// running; `stop` cancels everything still pending.
pub struct TimerService {
    backend: Arc<dyn TimerBackend>,
    signal: Arc<TimerSignal>,
    config: TimerThreadConfig,
    thread: Mutex<Option<TimerThreadHandle>>,
}

impl TimerService {
    pub fn new(config: TimerThreadConfig) -> Self {
        TimerService {
            backend: Arc::new(HeapTimerBackend::new()),
            signal: Arc::new(TimerSignal::default()),
            config,
            thread: Mutex::new(None),
        }
    }

    /// Start the timer thread; `fire` runs on it for every expiry
    pub fn start<F>(&self, fire: F) -> SchedResult<()>
    where
        F: Fn(ExpiredTimer) + Send + 'static,
    {
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Ok(());
        }
        *slot = Some(spawn_timer_thread(
            self.backend.clone(),
            self.signal.clone(),
            fire,
            self.config.clone(),
        )?);
        Ok(())
    }

    /// Stop the thread and cancel pending timers
    pub fn stop(&self) -> Option<TimerStats> {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let stats = handle.map(TimerThreadHandle::shutdown);
        self.backend.clear();
        stats
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn start_timer(&self, delay: Duration, callback: MessageCallback, data: u32) -> TimerHandle {
        self.schedule(TimerEntry::one_shot(delay, callback, data))
    }

    pub fn start_periodic(&self, interval: Duration, callback: MessageCallback, data: u32) -> TimerHandle {
        self.schedule(TimerEntry::periodic(interval, callback, data))
    }

    pub fn stop_timer(&self, handle: TimerHandle) -> bool {
        self.backend.cancel(handle)
    }

    pub fn pending(&self) -> usize {
        self.backend.len()
    }

    fn schedule(&self, entry: TimerEntry) -> TimerHandle {
        let handle = self.backend.insert(entry);
        self.signal.kick();
        handle
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}
