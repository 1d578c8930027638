//! Log entries and the block list that stores them

mod entry;
mod list;

pub use entry::{
    ActionStatus, ArgVec, CallFunctionData, CallbackOperationData, CodeParseData, EventKind,
    EventLogEntry, EventPayload, ExternalCallData, PayloadShape, PropertyEnumStep,
};
pub use list::{DEFAULT_BLOCK_CAPACITY, EventCursor, EventHandle, EventList};
