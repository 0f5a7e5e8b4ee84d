//! Escalation of unrecoverable scheduler conditions
//!
//! Sustained pool exhaustion and handler stalls are treated as faults.
//! The configured policy decides whether the process keeps running.

use core::fmt;
use core::str::FromStr;

/// What to do when a fault threshold is crossed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Log at error level and keep running
    LogOnly,
    /// Panic the calling thread
    Panic,
    /// Log, then abort the process
    #[default]
    Abort,
}

impl FaultPolicy {
    /// Apply the policy for a fault described by `reason`
    ///
    /// Returns only for `LogOnly`.
    pub fn raise(self, reason: fmt::Arguments<'_>) {
        match self {
            FaultPolicy::LogOnly => {
                tracing::error!(policy = "log", "{}", reason);
            }
            FaultPolicy::Panic => {
                tracing::error!(policy = "panic", "{}", reason);
                panic!("scheduler fault: {}", reason);
            }
            FaultPolicy::Abort => {
                tracing::error!(policy = "abort", "{}", reason);
                std::process::abort();
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FaultPolicy::LogOnly => "log",
            FaultPolicy::Panic => "panic",
            FaultPolicy::Abort => "abort",
        }
    }
}

impl fmt::Display for FaultPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "log" | "log_only" | "logonly" | "warn" => Ok(FaultPolicy::LogOnly),
            "panic" => Ok(FaultPolicy::Panic),
            "abort" | "crash" => Ok(FaultPolicy::Abort),
            _ => Err(()),
        }
    }
}
