//! ttdlog core - deterministic record/replay event log
//!
//! This crate records every nondeterministic interaction between a script
//! runtime and its host so execution can be replayed exactly, and lets a
//! debugger move backward and forward through the replay.
//!
//! # Architecture
//!
//! - [`EventList`] - Append-only block list of log entries
//! - [`ModeStack`] - Record/replay/debugging mode flags
//! - [`CallStackShadow`] - Mirror of the interpreter call stack
//! - [`EventLog`] - Record, replay, snapshots, seek and pruning
//! - [`BreakpointTracker`] - Time-travel breakpoints (feature `debugging`)
//!
//! The interpreter and snapshot serializer stay outside the crate and are
//! reached through the [`ScriptRuntime`] and [`SnapshotSubsystem`] traits.

pub mod binary;
#[cfg(feature = "debugging")]
pub mod breakpoint;
pub mod callstack;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
#[cfg(test)]
mod integration;
pub mod log;
pub mod mode;
pub mod snapshot;
#[cfg(test)]
pub mod test_utils;

// Re-export core types
pub use callstack::{CallStackShadow, SingleCallCounter, StatementInfo};
pub use config::TtdConfig;
pub use error::{AbortReason, HostError, TtdError, TtdResult};
pub use event::{
    ActionStatus, EventCursor, EventHandle, EventKind, EventList, EventLogEntry, EventPayload,
};
pub use host::{
    ContextId, FunctionId, PropertyId, ScriptRuntime, SnapshotSubsystem, SourcePosition,
    StatementSpan, TtdHost, TtdVar,
};
pub use log::{
    ActionResultRecorder, CallFrameGuard, CallFunctionRecorder, EventLog, ExternalCallOutcome,
    JsErrorKind, PropertyRecord, ScriptKind, SnapSeek, TimeTravelPause, TopLevelScript,
};
pub use mode::{ModeStack, TtdMode};
pub use snapshot::{InflateMap, Snapshot};

// Re-export binary format types
pub use binary::{LogBody, LogFlags, LogFormatError, LogHeader, LogReader, LogWriter};

#[cfg(feature = "debugging")]
pub use breakpoint::{ActiveBreakpoint, BreakpointState, BreakpointTracker, TtdSourceLocation};
#[cfg(feature = "debugging")]
pub use callstack::LastReturnLocation;
