//! Log entry types
//!
//! Every entry is a closed [`EventKind`] tag plus an [`EventPayload`] whose
//! shape is fixed by the kind. Payload accessors check the shape before
//! handing data out; a shape that does not match its kind is log corruption.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::host::{FunctionId, PropertyId, TtdVar};

/// Argument list stored inline for the common small-arity case
pub type ArgVec = SmallVec<[TtdVar; 4]>;

/// Kind of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventKind {
    // Root markers
    Snapshot,
    EventLoopYieldPoint,

    // Nondeterministic values observed by script code
    TopLevelCode,
    TelemetryLog,
    DateTime,
    DateString,
    RandomSeed,
    PropertyEnum,
    SymbolCreation,
    ExternalCall,
    EnqueueTask,

    // Host API (JsRT) actions
    CreateNumber,
    CreateBoolean,
    CreateString,
    CreateSymbol,
    CreateError,
    CreateRangeError,
    CreateReferenceError,
    CreateSyntaxError,
    CreateTypeError,
    CreateUriError,
    VarToNumber,
    VarToBoolean,
    VarToString,
    VarToObject,
    AddRootRef,
    RemoveRootRef,
    AllocateObject,
    AllocateExternalObject,
    AllocateArray,
    AllocateArrayBuffer,
    AllocateExternalArrayBuffer,
    AllocateFunction,
    HostExitProcess,
    GetAndClearException,
    SetException,
    GetProperty,
    GetIndex,
    GetOwnPropertyInfo,
    GetOwnPropertyNamesInfo,
    GetOwnPropertySymbolsInfo,
    DefineProperty,
    DeleteProperty,
    SetPrototype,
    SetProperty,
    SetIndex,
    GetTypedArrayInfo,
    RawBufferCopySync,
    RawBufferModifySync,
    RawBufferAsyncModificationRegister,
    RawBufferAsyncModifyComplete,
    ConstructCall,
    CallbackOperation,
    CodeParse,
    CallExistingFunction,
}

/// Payload layout a kind carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    Snapshot,
    YieldPoint,
    TopLevelCode,
    Telemetry,
    DateTime,
    DateString,
    RandomSeed,
    PropertyEnum,
    SymbolCreation,
    ExternalCall,
    EnqueueTask,
    Vars,
    VarsWithProperty,
    Integral,
    Number,
    Text,
    Buffer,
    RawBufferCopy,
    CallbackOperation,
    CodeParse,
    CallFunction,
}

impl EventKind {
    /// Whether this kind is a host API action rather than a script-observed value
    pub fn is_action(self) -> bool {
        self >= Self::CreateNumber
    }

    /// Whether entries of this kind start a top-level entry into script code.
    ///
    /// Snapshot markers, event-loop yields and host-issued actions are roots;
    /// everything else nests inside exactly one of them.
    pub fn is_root(self) -> bool {
        matches!(self, Self::Snapshot | Self::EventLoopYieldPoint) || self.is_action()
    }

    /// Payload layout entries of this kind must carry
    pub fn shape(self) -> PayloadShape {
        use EventKind::*;
        match self {
            Snapshot => PayloadShape::Snapshot,
            EventLoopYieldPoint => PayloadShape::YieldPoint,
            TopLevelCode => PayloadShape::TopLevelCode,
            TelemetryLog => PayloadShape::Telemetry,
            DateTime => PayloadShape::DateTime,
            DateString => PayloadShape::DateString,
            RandomSeed => PayloadShape::RandomSeed,
            PropertyEnum => PayloadShape::PropertyEnum,
            SymbolCreation => PayloadShape::SymbolCreation,
            ExternalCall => PayloadShape::ExternalCall,
            EnqueueTask => PayloadShape::EnqueueTask,
            CreateNumber => PayloadShape::Number,
            CreateBoolean => PayloadShape::Integral,
            CreateString => PayloadShape::Text,
            CreateSymbol | CreateError | CreateRangeError | CreateReferenceError
            | CreateSyntaxError | CreateTypeError | CreateUriError => PayloadShape::Vars,
            VarToNumber | VarToBoolean | VarToString | VarToObject => PayloadShape::Vars,
            AddRootRef | RemoveRootRef => PayloadShape::Vars,
            AllocateObject | AllocateExternalObject => PayloadShape::Vars,
            AllocateArray => PayloadShape::Integral,
            AllocateArrayBuffer | AllocateExternalArrayBuffer => PayloadShape::Buffer,
            AllocateFunction => PayloadShape::Vars,
            HostExitProcess => PayloadShape::Integral,
            GetAndClearException => PayloadShape::Vars,
            SetException => PayloadShape::Integral,
            GetProperty | GetOwnPropertyInfo => PayloadShape::VarsWithProperty,
            GetIndex => PayloadShape::Vars,
            GetOwnPropertyNamesInfo | GetOwnPropertySymbolsInfo => PayloadShape::Vars,
            DefineProperty | DeleteProperty | SetProperty => PayloadShape::VarsWithProperty,
            SetPrototype | SetIndex => PayloadShape::Vars,
            GetTypedArrayInfo => PayloadShape::Vars,
            RawBufferCopySync => PayloadShape::RawBufferCopy,
            RawBufferModifySync | RawBufferAsyncModifyComplete => PayloadShape::Buffer,
            RawBufferAsyncModificationRegister => PayloadShape::Integral,
            ConstructCall => PayloadShape::CallFunction,
            CallbackOperation => PayloadShape::CallbackOperation,
            CodeParse => PayloadShape::CodeParse,
            CallExistingFunction => PayloadShape::CallFunction,
        }
    }
}

/// Completion state of a two-phase entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActionStatus {
    /// Inputs and outputs are both recorded
    #[default]
    Complete,
    /// Inputs are recorded, the action is still running
    Pending,
    /// The action exited without recording a result
    Abandoned,
}

/// One step of a recorded property enumeration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyEnumStep {
    /// Whether the enumerator produced a property on this step
    pub return_code: bool,
    pub pid: PropertyId,
    pub attributes: u8,
    /// Name of properties with no stable property id
    pub name: Option<String>,
}

/// Call from script code out to a host function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCallData {
    pub function: FunctionId,
    pub root_nesting_depth: u32,
    pub args: ArgVec,
    pub result: Option<TtdVar>,
    /// The host function threw instead of returning
    pub threw: bool,
    /// Event time of the last event recorded while the call was running
    pub last_nested_event_time: i64,
}

/// Create or cancel of a host callback (timer, promise job, event handler)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackOperationData {
    pub is_create: bool,
    pub is_cancel: bool,
    pub is_repeating: bool,
    pub function: Option<FunctionId>,
    /// Host-assigned id correlating create and cancel
    pub callback_id: i64,
    /// Event time of the registration this operation refers to
    pub register_event_time: i64,
}

/// Source parse requested by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeParseData {
    pub load_flag: u32,
    pub is_utf8: bool,
    pub source: Vec<u8>,
    pub source_context_id: u64,
    pub source_uri: String,
    pub result: Option<TtdVar>,
}

/// Host call into a script function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallFunctionData {
    /// Root nesting depth at the call, 0 for a top-level entry
    pub root_depth: u32,
    /// Host callback id that triggered this call, -1 if invoked directly
    pub host_callback_id: i64,
    pub function: TtdVar,
    pub args: ArgVec,
    pub result: Option<TtdVar>,
    pub threw: bool,
    /// Wall-clock time the call ran for during recording
    pub elapsed_secs: f64,
    /// Event time of the last event recorded inside the call
    pub last_nested_event_time: i64,
}

/// Kind-specific entry data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    Snapshot {
        checksum: u64,
        ready_to_run: bool,
    },
    YieldPoint,
    TopLevelCode {
        body_counter_id: u64,
    },
    Telemetry {
        info: String,
        do_print: bool,
    },
    DateTime {
        time: f64,
    },
    DateString {
        value: String,
    },
    RandomSeed {
        seed0: u64,
        seed1: u64,
    },
    PropertyEnum(PropertyEnumStep),
    SymbolCreation {
        pid: PropertyId,
    },
    ExternalCall(ExternalCallData),
    EnqueueTask {
        task: TtdVar,
        last_nested_event_time: i64,
    },
    Vars {
        vars: ArgVec,
        result: Option<TtdVar>,
    },
    VarsWithProperty {
        vars: ArgVec,
        pid: PropertyId,
        flag: bool,
        result: Option<TtdVar>,
    },
    Integral {
        vars: ArgVec,
        value: i64,
        flag: bool,
        result: Option<TtdVar>,
    },
    Number {
        value: f64,
        result: Option<TtdVar>,
    },
    Text {
        value: String,
        result: Option<TtdVar>,
    },
    Buffer {
        vars: ArgVec,
        index: u32,
        bytes: Vec<u8>,
        result: Option<TtdVar>,
    },
    RawBufferCopy {
        dst: TtdVar,
        dst_index: u32,
        src: TtdVar,
        src_index: u32,
        length: u32,
    },
    CallbackOperation(CallbackOperationData),
    CodeParse(CodeParseData),
    CallFunction(CallFunctionData),
}

impl EventPayload {
    /// Layout of this payload
    pub fn shape(&self) -> PayloadShape {
        match self {
            Self::Snapshot { .. } => PayloadShape::Snapshot,
            Self::YieldPoint => PayloadShape::YieldPoint,
            Self::TopLevelCode { .. } => PayloadShape::TopLevelCode,
            Self::Telemetry { .. } => PayloadShape::Telemetry,
            Self::DateTime { .. } => PayloadShape::DateTime,
            Self::DateString { .. } => PayloadShape::DateString,
            Self::RandomSeed { .. } => PayloadShape::RandomSeed,
            Self::PropertyEnum(_) => PayloadShape::PropertyEnum,
            Self::SymbolCreation { .. } => PayloadShape::SymbolCreation,
            Self::ExternalCall(_) => PayloadShape::ExternalCall,
            Self::EnqueueTask { .. } => PayloadShape::EnqueueTask,
            Self::Vars { .. } => PayloadShape::Vars,
            Self::VarsWithProperty { .. } => PayloadShape::VarsWithProperty,
            Self::Integral { .. } => PayloadShape::Integral,
            Self::Number { .. } => PayloadShape::Number,
            Self::Text { .. } => PayloadShape::Text,
            Self::Buffer { .. } => PayloadShape::Buffer,
            Self::RawBufferCopy { .. } => PayloadShape::RawBufferCopy,
            Self::CallbackOperation(_) => PayloadShape::CallbackOperation,
            Self::CodeParse(_) => PayloadShape::CodeParse,
            Self::CallFunction(_) => PayloadShape::CallFunction,
        }
    }

    /// Store the action result. Returns false if this payload has no result slot.
    pub fn set_result(&mut self, value: TtdVar) -> bool {
        match self {
            Self::Vars { result, .. }
            | Self::VarsWithProperty { result, .. }
            | Self::Integral { result, .. }
            | Self::Number { result, .. }
            | Self::Text { result, .. }
            | Self::Buffer { result, .. } => *result = Some(value),
            Self::ExternalCall(data) => data.result = Some(value),
            Self::CodeParse(data) => data.result = Some(value),
            Self::CallFunction(data) => data.result = Some(value),
            _ => return false,
        }
        true
    }

    /// The recorded action result, if any
    pub fn result(&self) -> Option<TtdVar> {
        match self {
            Self::Vars { result, .. }
            | Self::VarsWithProperty { result, .. }
            | Self::Integral { result, .. }
            | Self::Number { result, .. }
            | Self::Text { result, .. }
            | Self::Buffer { result, .. } => *result,
            Self::ExternalCall(data) => data.result,
            Self::CodeParse(data) => data.result,
            Self::CallFunction(data) => data.result,
            _ => None,
        }
    }

    /// Whether this payload records a result at all
    pub fn has_result_slot(&self) -> bool {
        matches!(
            self,
            Self::Vars { .. }
                | Self::VarsWithProperty { .. }
                | Self::Integral { .. }
                | Self::Number { .. }
                | Self::Text { .. }
                | Self::Buffer { .. }
                | Self::ExternalCall(_)
                | Self::CodeParse(_)
                | Self::CallFunction(_)
        )
    }

    /// Approximate heap bytes owned by this payload
    pub fn heap_size(&self) -> usize {
        match self {
            Self::Telemetry { info, .. } => info.len(),
            Self::DateString { value } | Self::Text { value, .. } => value.len(),
            Self::PropertyEnum(step) => step.name.as_ref().map_or(0, String::len),
            Self::Buffer { bytes, .. } => bytes.len(),
            Self::CodeParse(data) => data.source.len() + data.source_uri.len(),
            _ => 0,
        }
    }
}

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub kind: EventKind,
    /// Logical timestamp, unique and strictly increasing in log order
    pub event_time: i64,
    pub status: ActionStatus,
    pub payload: EventPayload,
}

impl EventLogEntry {
    /// Create a complete entry
    pub fn new(kind: EventKind, event_time: i64, payload: EventPayload) -> Self {
        debug_assert_eq!(kind.shape(), payload.shape(), "payload does not fit {:?}", kind);
        Self {
            kind,
            event_time,
            status: ActionStatus::Complete,
            payload,
        }
    }

    /// Create an entry whose result is filled in later
    pub fn pending(kind: EventKind, event_time: i64, payload: EventPayload) -> Self {
        Self {
            status: ActionStatus::Pending,
            ..Self::new(kind, event_time, payload)
        }
    }

    pub fn is_root(&self) -> bool {
        self.kind.is_root()
    }

    /// Whether the payload layout matches the kind tag
    pub fn is_well_formed(&self) -> bool {
        self.kind.shape() == self.payload.shape()
    }

    /// Event time of the last event nested inside this one, or its own time
    /// for entries that do not run script code.
    pub fn last_nested_event_time(&self) -> i64 {
        match &self.payload {
            EventPayload::ExternalCall(data) => data.last_nested_event_time,
            EventPayload::EnqueueTask {
                last_nested_event_time,
                ..
            } => *last_nested_event_time,
            EventPayload::CallFunction(data) => data.last_nested_event_time,
            _ => self.event_time,
        }
    }
}
