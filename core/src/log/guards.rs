//! Scoped guards for bracketed log operations
//!
//! Each guard borrows the log mutably and derefs to it, so the code running
//! inside the bracket keeps recording and replaying through the guard. The
//! closing half of the bracket runs in `Drop`, on every exit path including
//! `?` propagation and unwinding.

use std::ops::{Deref, DerefMut};

use crate::event::{ActionStatus, EventHandle, EventPayload};
use crate::host::{FunctionId, TtdVar};
use crate::mode::TtdMode;

use super::EventLog;

macro_rules! deref_to_log {
    ($guard:ident) => {
        impl Deref for $guard<'_> {
            type Target = EventLog;

            fn deref(&self) -> &EventLog {
                self.log
            }
        }

        impl DerefMut for $guard<'_> {
            fn deref_mut(&mut self) -> &mut EventLog {
                self.log
            }
        }
    };
}

/// Completes a host action entry when the action exits.
///
/// An entry whose action never produced a result and was never marked
/// complete is left [`ActionStatus::Abandoned`] so replay can tell it apart
/// from a finished action.
pub struct ActionResultRecorder<'a> {
    log: &'a mut EventLog,
    handle: EventHandle,
    completed: bool,
    /// Script code runs inside the action, one nesting level deeper
    nests: bool,
}

impl<'a> ActionResultRecorder<'a> {
    pub(super) fn new(log: &'a mut EventLog, handle: EventHandle) -> Self {
        Self {
            log,
            handle,
            completed: false,
            nests: false,
        }
    }

    /// Recorder for an action that calls back into script. The nesting depth
    /// is raised until the recorder drops, matching the depth replay tracks
    /// while it re-executes the action.
    pub(super) fn nesting(log: &'a mut EventLog, handle: EventHandle) -> Self {
        log.root_nesting_depth += 1;
        Self {
            log,
            handle,
            completed: false,
            nests: true,
        }
    }

    /// Entry being recorded
    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Record the action's result value
    pub fn set_result(&mut self, value: TtdVar) {
        if let Some(entry) = self.log.events.get_mut(self.handle) {
            let stored = entry.payload.set_result(value);
            debug_assert!(stored, "{:?} has no result slot", entry.kind);
        }
        self.completed = true;
    }

    /// Mark an action with no result value as finished
    pub fn normal_completion(mut self) {
        self.completed = true;
    }
}

impl Drop for ActionResultRecorder<'_> {
    fn drop(&mut self) {
        if self.nests {
            self.log.root_nesting_depth -= 1;
        }
        let last_nested = self.log.last_event_time();
        let Some(entry) = self.log.events.get_mut(self.handle) else {
            tracing::warn!("Action entry pruned before completion");
            return;
        };
        // Construct calls run script code whose events nest inside them
        if let EventPayload::CallFunction(data) = &mut entry.payload {
            data.last_nested_event_time = last_nested;
        }
        if self.completed {
            entry.status = ActionStatus::Complete;
        } else {
            entry.status = ActionStatus::Abandoned;
            tracing::warn!(
                kind = ?entry.kind,
                event_time = entry.event_time,
                "Action exited without recording a result"
            );
        }
    }
}

deref_to_log!(ActionResultRecorder);

/// Completes a host call into script: result, elapsed time, and the last
/// event time nested inside the call.
pub struct CallFunctionRecorder<'a> {
    log: &'a mut EventLog,
    handle: EventHandle,
    root_depth: u32,
    begin_time: f64,
}

impl<'a> CallFunctionRecorder<'a> {
    pub(super) fn new(log: &'a mut EventLog, handle: EventHandle, root_depth: u32) -> Self {
        let begin_time = log.current_wall_time();
        log.root_nesting_depth += 1;
        Self {
            log,
            handle,
            root_depth,
            begin_time,
        }
    }

    pub fn handle(&self) -> EventHandle {
        self.handle
    }

    /// Record the value the function returned
    pub fn set_result(&mut self, value: TtdVar) {
        if let Some(entry) = self.log.events.get_mut(self.handle) {
            entry.payload.set_result(value);
        }
    }

    /// Record that the function threw
    pub fn set_threw(&mut self) {
        if let Some(entry) = self.log.events.get_mut(self.handle)
            && let EventPayload::CallFunction(data) = &mut entry.payload
        {
            data.threw = true;
        }
    }
}

impl Drop for CallFunctionRecorder<'_> {
    fn drop(&mut self) {
        self.log.root_nesting_depth -= 1;
        let elapsed = self.log.current_wall_time() - self.begin_time;
        let last_nested_event_time = self.log.last_event_time();

        if let Some(entry) = self.log.events.get_mut(self.handle) {
            let event_time = entry.event_time;
            if let EventPayload::CallFunction(data) = &mut entry.payload {
                data.elapsed_secs = elapsed;
                data.last_nested_event_time = last_nested_event_time;
                entry.status = if data.result.is_some() || data.threw {
                    ActionStatus::Complete
                } else {
                    tracing::warn!(event_time, "Call exited without recording a result");
                    ActionStatus::Abandoned
                };
            }
        }

        if self.root_depth == 0 {
            self.log.increment_elapsed_snapshot_time(elapsed);
        }
    }
}

deref_to_log!(CallFunctionRecorder);

/// Shadow call frame that pops with the exception path unless
/// [`CallFrameGuard::pop_info`] reports a normal return.
pub struct CallFrameGuard<'a> {
    log: &'a mut EventLog,
    function: FunctionId,
    popped: bool,
}

impl<'a> CallFrameGuard<'a> {
    pub(super) fn new(
        log: &'a mut EventLog,
        function: FunctionId,
        args: &[TtdVar],
        is_in_finally: bool,
    ) -> Self {
        log.push_call_event(function, args, is_in_finally);
        Self {
            log,
            function,
            popped: false,
        }
    }

    /// Pop the frame as a normal return
    pub fn pop_info(mut self, result: Option<TtdVar>) {
        self.log.pop_call_event(self.function, result);
        self.popped = true;
    }
}

impl Drop for CallFrameGuard<'_> {
    fn drop(&mut self) {
        if !self.popped {
            self.log.pop_call_event_exception(self.function);
        }
    }
}

deref_to_log!(CallFrameGuard);

/// Tracks how deeply host actions are nested
pub struct NestingDepthGuard<'a> {
    log: &'a mut EventLog,
}

impl<'a> NestingDepthGuard<'a> {
    pub(super) fn new(log: &'a mut EventLog) -> Self {
        log.root_nesting_depth += 1;
        Self { log }
    }
}

impl Drop for NestingDepthGuard<'_> {
    fn drop(&mut self) {
        debug_assert!(self.log.root_nesting_depth > 0);
        self.log.root_nesting_depth -= 1;
    }
}

deref_to_log!(NestingDepthGuard);

/// Suspends time travel while the debugger or host runs its own code
pub struct TimeTravelPause<'a> {
    log: &'a mut EventLog,
}

impl<'a> TimeTravelPause<'a> {
    pub(super) fn new(log: &'a mut EventLog) -> Self {
        log.modes.push_mode(TtdMode::EXCLUDED_EXECUTION);
        Self { log }
    }
}

impl Drop for TimeTravelPause<'_> {
    fn drop(&mut self) {
        self.log.modes.pop_mode(TtdMode::EXCLUDED_EXECUTION);
    }
}

deref_to_log!(TimeTravelPause);
