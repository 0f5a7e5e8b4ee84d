//! Timer thread
//!
//! Polls the backend, hands expired timers to the fire callback, then
//! sleeps until the next deadline. Inserting a timer kicks the thread so
//! a new earliest deadline is honoured without waiting out the old sleep.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mcsched_core::{SchedError, SchedResult};
use tracing::{debug, error};

use super::{ExpiredTimer, TimerBackend};

#[derive(Debug, Clone)]
pub struct TimerThreadConfig {
    /// Longest sleep without re-checking the backend
    pub max_sleep: Duration,
    /// Shortest sleep, keeps a burst of near-due timers from spinning
    pub min_sleep: Duration,
    pub thread_name: String,
}

impl Default for TimerThreadConfig {
    fn default() -> Self {
        Self {
            max_sleep: Duration::from_millis(100),
            min_sleep: Duration::from_micros(200),
            thread_name: "mc_timer".into(),
        }
    }
}

/// Counters returned when the timer thread exits
#[derive(Debug, Clone, Default)]
pub struct TimerStats {
    pub poll_count: u64,
    pub timers_fired: u64,
    pub max_batch_size: usize,
}

#[derive(Default)]
struct Ctl {
    shutdown: bool,
    kicked: bool,
}

/// Shutdown flag and wakeup for the timer thread
#[derive(Default)]
pub(crate) struct TimerSignal {
    ctl: Mutex<Ctl>,
    cond: Condvar,
}

impl TimerSignal {
    fn lock(&self) -> MutexGuard<'_, Ctl> {
        self.ctl.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn kick(&self) {
        self.lock().kicked = true;
        self.cond.notify_one();
    }

    fn request_shutdown(&self) {
        self.lock().shutdown = true;
        self.cond.notify_one();
    }

    fn reset(&self) {
        let mut c = self.lock();
        c.shutdown = false;
        c.kicked = false;
    }

    /// Sleep up to `timeout`; returns true if shutdown was requested
    fn sleep(&self, timeout: Duration) -> bool {
        let mut c = self.lock();
        if !c.kicked && !c.shutdown {
            c = self
                .cond
                .wait_timeout(c, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        c.kicked = false;
        c.shutdown
    }

    fn is_shutdown(&self) -> bool {
        self.lock().shutdown
    }
}

pub struct TimerThreadHandle {
    handle: Option<JoinHandle<TimerStats>>,
    signal: Arc<TimerSignal>,
}

impl TimerThreadHandle {
    /// Request shutdown and wait for the thread
    pub fn shutdown(mut self) -> TimerStats {
        self.signal.request_shutdown();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("timer thread panicked");
                TimerStats::default()
            }
            None => TimerStats::default(),
        }
    }
}

impl Drop for TimerThreadHandle {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            self.signal.request_shutdown();
            let _ = h.join();
        }
    }
}

/// Spawn the timer thread
pub(crate) fn spawn_timer_thread<F>(
    backend: Arc<dyn TimerBackend>,
    signal: Arc<TimerSignal>,
    fire: F,
    config: TimerThreadConfig,
) -> SchedResult<TimerThreadHandle>
where
    F: Fn(ExpiredTimer) + Send + 'static,
{
    signal.reset();
    let thread_signal = signal.clone();
    let handle = thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || timer_loop(backend, thread_signal, fire, config))
        .map_err(|_| SchedError::SpawnFailed("timer"))?;
    Ok(TimerThreadHandle {
        handle: Some(handle),
        signal,
    })
}

fn timer_loop<F>(
    backend: Arc<dyn TimerBackend>,
    signal: Arc<TimerSignal>,
    fire: F,
    config: TimerThreadConfig,
) -> TimerStats
where
    F: Fn(ExpiredTimer),
{
    debug!(backend = backend.name(), "timer thread started");
    let mut stats = TimerStats::default();

    while !signal.is_shutdown() {
        let expired = backend.poll_expired(Instant::now());
        let batch = expired.len();
        stats.poll_count += 1;
        stats.timers_fired += batch as u64;
        stats.max_batch_size = stats.max_batch_size.max(batch);

        for timer in expired {
            fire(timer);
        }

        if signal.sleep(calculate_sleep(backend.next_deadline(), &config)) {
            break;
        }
    }

    debug!(fired = stats.timers_fired, "timer thread stopped");
    stats
}

#[inline]
fn calculate_sleep(next: Option<Instant>, config: &TimerThreadConfig) -> Duration {
    match next {
        Some(deadline) => {
            let now = Instant::now();
            if deadline <= now {
                Duration::ZERO
            } else {
                (deadline - now).min(config.max_sleep).max(config.min_sleep)
            }
        }
        None => config.max_sleep,
    }
}
