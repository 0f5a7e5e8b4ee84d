//! Controller and lifecycle state

use core::marker::PhantomData;
use core::sync::atomic::{AtomicU8, Ordering};

/// Where the controller thread currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ControllerState {
    /// Not started, or blocked waiting for an event
    Idle = 0,
    /// Popping envelopes off a queue
    Draining = 1,
    /// Running a handler
    Dispatching = 2,
    /// Parked by a suspend request
    Suspended = 3,
    /// Shutdown bit observed, leaving the loop
    ShuttingDown = 4,
    /// Loop exited
    Stopped = 5,
}

impl ControllerState {
    /// Whether the controller thread is still inside its loop
    #[inline]
    pub fn is_live(self) -> bool {
        !matches!(self, ControllerState::Stopped)
    }
}

impl From<u8> for ControllerState {
    fn from(v: u8) -> Self {
        match v {
            0 => ControllerState::Idle,
            1 => ControllerState::Draining,
            2 => ControllerState::Dispatching,
            3 => ControllerState::Suspended,
            4 => ControllerState::ShuttingDown,
            _ => ControllerState::Stopped,
        }
    }
}

impl From<ControllerState> for u8 {
    fn from(s: ControllerState) -> u8 {
        s as u8
    }
}

/// Scheduler lifecycle
///
/// ```text
/// Initialized --enable--> Running --disable--> Disabled --deinit--> Deinitialized
///                          |   ^                  |
///                  suspend |   | resume           +--enable--> Running
///                          v   |
///                        Suspended
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LifecycleState {
    Initialized = 0,
    Running = 1,
    Suspended = 2,
    Disabled = 3,
    Deinitialized = 4,
}

impl LifecycleState {
    /// Controller thread exists in this state
    #[inline]
    pub fn is_enabled(self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Suspended)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Initialized => "initialized",
            LifecycleState::Running => "running",
            LifecycleState::Suspended => "suspended",
            LifecycleState::Disabled => "disabled",
            LifecycleState::Deinitialized => "deinitialized",
        }
    }
}

impl From<u8> for LifecycleState {
    fn from(v: u8) -> Self {
        match v {
            0 => LifecycleState::Initialized,
            1 => LifecycleState::Running,
            2 => LifecycleState::Suspended,
            3 => LifecycleState::Disabled,
            _ => LifecycleState::Deinitialized,
        }
    }
}

impl From<LifecycleState> for u8 {
    fn from(s: LifecycleState) -> u8 {
        s as u8
    }
}

/// Atomic cell for a `repr(u8)` state enum
pub struct StateCell<S> {
    raw: AtomicU8,
    _marker: PhantomData<S>,
}

impl<S> StateCell<S>
where
    S: Copy + Into<u8> + From<u8>,
{
    pub fn new(initial: S) -> Self {
        StateCell {
            raw: AtomicU8::new(initial.into()),
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn get(&self) -> S {
        S::from(self.raw.load(Ordering::Acquire))
    }

    #[inline]
    pub fn set(&self, s: S) {
        self.raw.store(s.into(), Ordering::Release);
    }

    /// Transition `from -> to`; returns the observed state on mismatch
    #[inline]
    pub fn transition(&self, from: S, to: S) -> Result<(), S> {
        self.raw
            .compare_exchange(from.into(), to.into(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(S::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_state_roundtrip() {
        for s in [
            ControllerState::Idle,
            ControllerState::Draining,
            ControllerState::Dispatching,
            ControllerState::Suspended,
            ControllerState::ShuttingDown,
            ControllerState::Stopped,
        ] {
            assert_eq!(ControllerState::from(u8::from(s)), s);
        }
        assert!(!ControllerState::Stopped.is_live());
    }

    #[test]
    fn test_state_cell_transition() {
        let cell = StateCell::new(LifecycleState::Initialized);
        assert!(cell.transition(LifecycleState::Initialized, LifecycleState::Running).is_ok());
        assert_eq!(
            cell.transition(LifecycleState::Initialized, LifecycleState::Running),
            Err(LifecycleState::Running)
        );
        assert!(cell.get().is_enabled());
        cell.set(LifecycleState::Disabled);
        assert!(!cell.get().is_enabled());
        assert_eq!(cell.get().as_str(), "disabled");
    }
}
