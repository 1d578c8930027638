//! Host collaborator interfaces
//!
//! The event log never looks inside runtime values. Values, functions and
//! property ids are opaque tokens handed to it by the interpreter, and the
//! two collaborators below are the only way it reaches back into the runtime.

use serde::{Deserialize, Serialize};

use crate::error::{HostError, TtdResult};
use crate::event::EventLogEntry;
use crate::log::EventLog;
use crate::snapshot::InflateMap;

/// Opaque runtime value handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TtdVar(pub u64);

/// Opaque function identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct FunctionId(pub u64);

/// Runtime property id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct PropertyId(pub i32);

/// Script context identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ContextId(pub u32);

/// Location of a statement in script source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct SourcePosition {
    /// Log id of the script the statement belongs to
    pub script_id: u64,
    pub line: u32,
    pub column: u32,
}

/// Statement covering a bytecode offset, as resolved by the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementSpan {
    /// Statement index within the function body
    pub index: i32,
    /// First bytecode offset of the statement
    pub bytecode_min: u32,
    /// Last bytecode offset of the statement
    pub bytecode_max: u32,
    /// Source location of the statement
    pub position: SourcePosition,
}

/// Interpreter and object model
pub trait ScriptRuntime {
    /// Resolve the statement containing `bytecode_offset` in `function`
    fn statement_at(&self, function: FunctionId, bytecode_offset: u32) -> Option<StatementSpan>;

    /// Re-run a host-issued action during replay.
    ///
    /// Script code run by the action consumes its nested events through the
    /// `replay_*` methods on `log`.
    fn execute_action(&mut self, log: &mut EventLog, entry: &EventLogEntry) -> TtdResult<()>;
}

/// Snapshot serializer and inflator
pub trait SnapshotSubsystem {
    /// Capture the full runtime state
    fn extract_snapshot(&mut self) -> Result<Vec<u8>, HostError>;

    /// Restore runtime state from `data`.
    ///
    /// `map` holds the live objects from the previous inflate when it is being
    /// reused (`map.is_reused()`), so unchanged objects can be kept.
    fn inflate_snapshot(&mut self, data: &[u8], map: &mut InflateMap) -> Result<(), HostError>;
}

/// Everything the replay driver needs from the host
pub trait TtdHost: ScriptRuntime + SnapshotSubsystem {}

impl<T: ScriptRuntime + SnapshotSubsystem + ?Sized> TtdHost for T {}
