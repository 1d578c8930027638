//! Debugger position queries and breakpoint bookkeeping
//!
//! Positions come from the shadow call stack: the top-level event time of
//! the running root call, the frame's function time, and the statement's
//! loop time together pin a statement execution in logical time.

use crate::breakpoint::{ActiveBreakpoint, BreakpointTracker, TtdSourceLocation};
use crate::callstack::{SingleCallCounter, StatementInfo};
use crate::error::{AbortReason, TtdError};
use crate::event::{EventKind, EventPayload};
use crate::host::FunctionId;

use super::EventLog;

impl EventLog {
    pub fn breakpoints(&self) -> &BreakpointTracker {
        &self.breakpoints
    }

    ////////
    // Pending breakpoint

    pub fn set_pending_ttd_bp_info(&mut self, location: TtdSourceLocation) {
        tracing::debug!(
            event_time = location.event_time,
            line = location.position.line,
            "Pending breakpoint set"
        );
        self.breakpoints.set_pending_ttd_bp_info(location);
    }

    pub fn has_pending_ttd_bp(&self) -> bool {
        self.breakpoints.has_pending_ttd_bp()
    }

    pub fn pending_ttd_bp_info(&self) -> Option<&TtdSourceLocation> {
        self.breakpoints.pending_ttd_bp_info()
    }

    /// Event time the pending breakpoint targets, -1 if none
    pub fn pending_ttd_bp_target_event_time(&self) -> i64 {
        self.breakpoints.pending_ttd_bp_target_event_time()
    }

    pub fn clear_pending_ttd_bp_info(&mut self) {
        self.breakpoints.clear_pending_ttd_bp_info();
    }

    ////////
    // Active breakpoint

    pub fn set_active_bp(&mut self, id: i64, is_new_bp: bool, location: TtdSourceLocation) {
        self.breakpoints.set_active_bp(id, is_new_bp, location);
    }

    pub fn has_active_bp(&self) -> bool {
        self.breakpoints.has_active_bp()
    }

    pub fn active_bp_id(&self) -> i64 {
        self.breakpoints.active_bp_id()
    }

    pub fn clear_active_bp(&mut self) -> Option<ActiveBreakpoint> {
        self.breakpoints.clear_active_bp()
    }

    ////////
    // Scanning for a previous location

    pub fn clear_bp_scan_list(&mut self) {
        self.breakpoints.clear_bp_scan_list();
    }

    pub fn add_current_location_during_scan(&mut self, location: TtdSourceLocation) {
        self.breakpoints.add_current_location_during_scan(location);
    }

    pub fn try_find_and_set_previous_bp(&mut self) -> bool {
        self.breakpoints.try_find_and_set_previous_bp()
    }

    /// Step back from the statement executing now.
    ///
    /// The current position becomes the pending breakpoint and the scan list
    /// is cleared, so the replay that follows collects the locations that
    /// precede it. The returned abort unwinds to the replay driver, which
    /// seeks to the pending target's event time and replays it.
    pub fn request_step_back(&mut self) -> TtdError {
        let current = self.time_and_position_for_debugger();
        self.set_pending_ttd_bp_info(current);
        self.clear_bp_scan_list();
        self.abort_replay_return_to_host(AbortReason::StepBack)
    }

    /// Whether a breakpoint hit at the current position stops execution
    pub fn process_bp_info_pre_break(&mut self) -> bool {
        if !self.modes.should_perform_debug_breakpoint_action() {
            return false;
        }
        let current = self.time_and_position_for_debugger();
        self.breakpoints.process_bp_info_pre_break(&current)
    }

    /// Resume after a break
    pub fn process_bp_info_post_break(&mut self) -> Option<ActiveBreakpoint> {
        self.call_stack.clear_return_frames();
        self.breakpoints.process_bp_info_post_break()
    }

    ////////
    // First user code

    pub fn set_break_on_first_user_code(&mut self) {
        self.breakpoints.set_break_on_first_user_code();
    }

    /// Whether entering `function` should stop for the first-user-code request
    pub fn should_break_on_entry(&mut self, function: FunctionId) -> bool {
        if !self.modes.should_perform_debug_breakpoint_action() {
            return false;
        }
        let just_my_code = self.is_function_just_my_code(function);
        self.breakpoints.check_break_on_first_user_code(just_my_code)
    }

    ////////
    // Context recreation

    pub fn load_bp_list_for_context_recreate(
        &mut self,
        breakpoints: impl IntoIterator<Item = TtdSourceLocation>,
    ) {
        self.breakpoints.load_bp_list_for_context_recreate(breakpoints);
    }

    pub fn restore_bp_list_after_context_recreate(&self) -> &[TtdSourceLocation] {
        self.breakpoints.restore_bp_list_after_context_recreate()
    }

    pub fn unload_bp_list_after_move_for_context_recreate(&mut self) {
        self.breakpoints.unload_bp_list_after_move_for_context_recreate();
    }

    ////////
    // Position queries

    fn location_of(&self, frame: &SingleCallCounter, statement: &StatementInfo) -> TtdSourceLocation {
        TtdSourceLocation {
            event_time: self.call_stack.top_level_event_time(),
            function_time: frame.function_time,
            loop_time: statement.loop_time,
            function: Some(frame.function),
            statement_index: statement.index,
            position: statement.position,
            ..TtdSourceLocation::UNDEFINED
        }
    }

    /// Logical time and position of the statement executing now
    pub fn time_and_position_for_debugger(&self) -> TtdSourceLocation {
        match self.call_stack.top() {
            Some(frame) if frame.current.is_defined() => self.location_of(frame, &frame.current),
            _ => TtdSourceLocation::UNDEFINED,
        }
    }

    /// Statement executed before the current one, falling back to the caller's
    /// current statement at the start of a call
    pub fn previous_time_and_position_for_debugger(&self) -> TtdSourceLocation {
        let Some(frame) = self.call_stack.top() else {
            return TtdSourceLocation::UNDEFINED;
        };
        if frame.last.is_defined() {
            return self.location_of(frame, &frame.last);
        }
        match self.call_stack.top_caller(false) {
            Some(caller) if caller.current.is_defined() => self.location_of(caller, &caller.current),
            _ => TtdSourceLocation::UNDEFINED,
        }
    }

    /// Position of the statement a call last returned or threw from. The flag
    /// is true when the exit was an exception.
    pub fn last_executed_time_and_position_for_debugger(
        &self,
        just_my_code: bool,
    ) -> Option<(TtdSourceLocation, bool)> {
        let last = self.call_stack.last_return_location(just_my_code);
        let frame = last.location()?;
        if !frame.current.is_defined() {
            return None;
        }
        Some((
            self.location_of(frame, &frame.current),
            last.is_exception_location(),
        ))
    }

    pub fn current_host_callback_id(&self) -> i64 {
        self.call_stack.host_callback_id()
    }

    pub fn current_top_level_event_time(&self) -> i64 {
        self.call_stack.top_level_event_time()
    }

    ////////
    // Top-level call times

    fn top_level_call_times(&self) -> impl DoubleEndedIterator<Item = i64> + '_ {
        self.events.iter().filter_map(|entry| match &entry.payload {
            EventPayload::CallFunction(data)
                if entry.kind == EventKind::CallExistingFunction && data.root_depth == 0 =>
            {
                Some(entry.event_time)
            }
            _ => None,
        })
    }

    /// Event time of the first top-level call still in the log
    pub fn first_top_level_event_time(&self) -> Option<i64> {
        self.top_level_call_times().next()
    }

    /// Event time of the last top-level call in the log
    pub fn last_top_level_event_time(&self) -> Option<i64> {
        self.top_level_call_times().next_back()
    }

    /// Event time of the `k`th top-level call, counting from 1
    pub fn kth_top_level_event_time(&self, k: usize) -> Option<i64> {
        self.top_level_call_times().nth(k.checked_sub(1)?)
    }
}
