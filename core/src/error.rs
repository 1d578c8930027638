//! Error types for the event log
//!
//! Errors fall into two groups. Fatal errors mean the log can no longer be
//! trusted (corruption, clock desync, I/O failure) and the session must end.
//! [`TtdError::Abort`] is the recoverable "return to host" signal raised when
//! replay runs out of log or the debugger needs control back.

use thiserror::Error;

use crate::binary::LogFormatError;
use crate::event::EventKind;

/// Result alias used throughout the crate
pub type TtdResult<T> = Result<T, TtdError>;

/// Why replay stopped and handed control back to the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Replay asked for an entry past the end of the log
    EndOfLog,
    /// The debugger asked to step back, which needs a reverse seek
    StepBack,
    /// The recorded program asked the host to exit
    HostExit { exit_code: i32 },
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndOfLog => write!(f, "reached end of log"),
            Self::StepBack => write!(f, "step back requested"),
            Self::HostExit { exit_code } => write!(f, "host exit with code {}", exit_code),
        }
    }
}

/// Failure reported by a host collaborator (interpreter or snapshot subsystem)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed: {message}")]
pub struct HostError {
    /// Operation that failed (e.g., "extract_snapshot")
    pub operation: &'static str,
    /// Host-provided description
    pub message: String,
}

impl HostError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Event log error
#[derive(Debug, Error)]
pub enum TtdError {
    /// Replayed entry does not have the kind the runtime asked for
    #[error("log corruption at event time {event_time}: expected {expected:?}, found {found:?}")]
    LogCorruption {
        expected: EventKind,
        found: EventKind,
        event_time: i64,
    },

    /// A nested event sits where only a root event may appear
    #[error("unexpected root event {found:?} at event time {event_time}")]
    UnexpectedRootEvent { found: EventKind, event_time: i64 },

    /// Replay cursor and logical clock disagree
    #[error("replay out of sync: clock at {clock}, cursor entry at {cursor}")]
    TimeDesync { clock: i64, cursor: i64 },

    /// Snapshot bytes no longer match their recorded checksum
    #[error("snapshot at event time {event_time} failed checksum verification")]
    SnapshotChecksum { event_time: i64 },

    /// No snapshot exists at the requested event time
    #[error("no snapshot available at or before event time {event_time}")]
    NoSnapshot { event_time: i64 },

    /// Replay stopped and control returns to the host
    #[error("replay aborted: {0}")]
    Abort(AbortReason),

    /// Host collaborator failure
    #[error(transparent)]
    Host(#[from] HostError),

    /// Persisted log could not be encoded or decoded
    #[error(transparent)]
    Format(#[from] LogFormatError),

    /// File I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TtdError {
    /// Whether the session cannot continue after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Abort(_) | Self::NoSnapshot { .. })
    }

    /// The abort reason, if this is a return-to-host signal
    pub fn abort_reason(&self) -> Option<AbortReason> {
        match self {
            Self::Abort(reason) => Some(*reason),
            _ => None,
        }
    }
}
