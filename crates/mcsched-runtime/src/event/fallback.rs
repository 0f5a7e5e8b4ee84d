//! Condvar-based event word
//!
//! Used on platforms without futex support.

use super::EventWord;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

pub struct CondvarEvent {
    word: Mutex<u32>,
    cond: Condvar,
}

impl CondvarEvent {
    pub fn new() -> Self {
        Self {
            word: Mutex::new(0),
            cond: Condvar::new(),
        }
    }
}

impl Default for CondvarEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl EventWord for CondvarEvent {
    fn set(&self, bits: u32) {
        let mut word = self.word.lock().unwrap_or_else(PoisonError::into_inner);
        *word |= bits;
        drop(word);
        self.cond.notify_all();
    }

    fn take(&self, bits: u32) -> u32 {
        let mut word = self.word.lock().unwrap_or_else(PoisonError::into_inner);
        let taken = *word & bits;
        *word &= !bits;
        taken
    }

    fn load(&self) -> u32 {
        *self.word.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_any(&self, mask: u32, timeout: Option<Duration>) -> u32 {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut word = self.word.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *word & mask != 0 {
                return *word & mask;
            }
            match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return 0;
                    }
                    word = self
                        .cond
                        .wait_timeout(word, d - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                None => {
                    word = self.cond.wait(word).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }
}
