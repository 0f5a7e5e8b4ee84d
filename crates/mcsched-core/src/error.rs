//! Error types for the message scheduler

use std::borrow::Cow;
use thiserror::Error;

use crate::id::ModuleId;

/// Result type for scheduler operations
pub type SchedResult<T> = Result<T, SchedError>;

/// Result returned by message handlers and message callbacks
pub type HandlerResult = Result<(), HandlerError>;

/// Errors returned by scheduler API calls
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// A required argument was missing or out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// No queue is registered for the destination
    #[error("module {0} is not registered")]
    NotRegistered(ModuleId),

    /// The destination already owns a queue
    #[error("module {0} is already registered")]
    AlreadyRegistered(ModuleId),

    /// Every queue slot is in use
    #[error("queue table full ({0} queues)")]
    TableFull(usize),

    /// The envelope pool has no free envelope
    #[error("envelope pool exhausted")]
    Resources,

    /// The scheduler is not accepting posts
    #[error("scheduler is shutting down")]
    ShuttingDown,

    /// The operation is not allowed in the current lifecycle state
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The controller did not answer within the allowed time
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// A scheduler thread could not be started
    #[error("failed to spawn {0} thread")]
    SpawnFailed(&'static str),

    /// An envelope was found in a state it cannot legally be in
    #[error("envelope integrity fault: {0}")]
    Integrity(&'static str),

    /// A configuration value was rejected
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SchedError {
    /// Short stable label, suitable for log fields and counters
    pub fn as_label(&self) -> &'static str {
        match self {
            SchedError::InvalidArgument(_) => "invalid_argument",
            SchedError::NotRegistered(_) => "not_registered",
            SchedError::AlreadyRegistered(_) => "already_registered",
            SchedError::TableFull(_) => "table_full",
            SchedError::Resources => "resources",
            SchedError::ShuttingDown => "shutting_down",
            SchedError::InvalidState(_) => "invalid_state",
            SchedError::Timeout(_) => "timeout",
            SchedError::SpawnFailed(_) => "spawn_failed",
            SchedError::Integrity(_) => "integrity",
            SchedError::InvalidConfig(_) => "invalid_config",
        }
    }

    /// True when retrying the same post later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, SchedError::Resources)
    }
}

/// Failure reported by a handler or message callback
///
/// The controller logs these and moves on; they never stop dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(Cow<'static, str>),

    #[error("unsupported message type {0:#06x}")]
    Unsupported(u16),

    #[error("message carries no callback")]
    MissingCallback,

    #[error("no legacy handler installed")]
    NoLegacyHandler,

    #[error("unexpected body for message type {0:#06x}")]
    BadBody(u16),

    #[error("handler panicked")]
    Panicked,
}

impl HandlerError {
    pub fn failed(reason: impl Into<Cow<'static, str>>) -> Self {
        HandlerError::Failed(reason.into())
    }

    pub fn as_label(&self) -> &'static str {
        match self {
            HandlerError::Failed(_) => "failed",
            HandlerError::Unsupported(_) => "unsupported",
            HandlerError::MissingCallback => "missing_callback",
            HandlerError::NoLegacyHandler => "no_legacy_handler",
            HandlerError::BadBody(_) => "bad_body",
            HandlerError::Panicked => "panicked",
        }
    }
}
