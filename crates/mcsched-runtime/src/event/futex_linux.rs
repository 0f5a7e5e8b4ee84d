//! Linux futex-based event word
//!
//! The futex word is the event word itself. A waiter registers in
//! `waiters`, re-reads the word and sleeps with FUTEX_WAIT on the value it
//! saw; a setter ORs its bits in and issues FUTEX_WAKE when anyone is
//! registered. Both sides use SeqCst so at least one of them observes the
//! other, and FUTEX_WAIT refuses to sleep once the word has changed.

use super::EventWord;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct FutexEvent {
    word: AtomicU32,
    waiters: AtomicUsize,
}

impl FutexEvent {
    pub fn new() -> Self {
        Self {
            word: AtomicU32::new(0),
            waiters: AtomicUsize::new(0),
        }
    }

    fn futex_wait(&self, expected: u32, timeout: Option<Duration>) {
        let timespec = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let timespec_ptr = match &timespec {
            Some(ts) => ts as *const libc::timespec,
            None => std::ptr::null(),
        };
        // Spurious returns (EAGAIN, EINTR, ETIMEDOUT) are handled by the caller's loop
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                libc::FUTEX_WAIT | libc::FUTEX_PRIVATE_FLAG,
                expected,
                timespec_ptr,
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }

    fn futex_wake_all(&self) {
        unsafe {
            libc::syscall(
                libc::SYS_futex,
                self.word.as_ptr(),
                libc::FUTEX_WAKE | libc::FUTEX_PRIVATE_FLAG,
                i32::MAX,
                std::ptr::null::<libc::timespec>(),
                std::ptr::null::<u32>(),
                0u32,
            );
        }
    }
}

impl Default for FutexEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWord for FutexEvent {
    fn set(&self, bits: u32) {
        self.word.fetch_or(bits, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.futex_wake_all();
        }
    }

    fn take(&self, bits: u32) -> u32 {
        self.word.fetch_and(!bits, Ordering::AcqRel) & bits
    }

    fn load(&self) -> u32 {
        self.word.load(Ordering::Acquire)
    }

    fn wait_any(&self, mask: u32, timeout: Option<Duration>) -> u32 {
        let deadline = timeout.map(|t| Instant::now() + t);
        self.waiters.fetch_add(1, Ordering::SeqCst);
        let seen = loop {
            let current = self.word.load(Ordering::SeqCst);
            if current & mask != 0 {
                break current & mask;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break 0;
                    }
                    Some(d - now)
                }
                None => None,
            };
            self.futex_wait(current, remaining);
        };
        self.waiters.fetch_sub(1, Ordering::SeqCst);
        seen
    }
}
