//! Time-travel breakpoint tracking
//!
//! A breakpoint target is a source position paired with the logical time it
//! executes at (top-level event time, function time, loop time). The tracker
//! moves through four states:
//!
//! - no pending breakpoint
//! - pending: the debugger asked to move to a location, possibly with an
//!   unknown time, and replay scans for candidates
//! - active and moving: replay runs toward a known location and time
//! - at breakpoint: the active location was reached
//!
//! Breakpoints survive script context recreation through a preserve list the
//! host loads before and restores after the move.

use serde::{Deserialize, Serialize};

use crate::host::{FunctionId, SourcePosition};

/// Breakpoint id meaning "no breakpoint"
pub const NO_BREAKPOINT: i64 = -1;

/// A source location at a point in logical time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtdSourceLocation {
    /// Debugger breakpoint id, [`NO_BREAKPOINT`] for plain positions
    pub bp_id: i64,
    /// Top-level event time of the call that executes the statement
    pub event_time: i64,
    /// Function time of the frame within its top-level call
    pub function_time: u64,
    /// Loop time of the statement within its frame
    pub loop_time: u64,
    pub function: Option<FunctionId>,
    pub statement_index: i32,
    pub position: SourcePosition,
}

impl TtdSourceLocation {
    /// A location with no time or position
    pub const UNDEFINED: Self = Self {
        bp_id: NO_BREAKPOINT,
        event_time: -1,
        function_time: 0,
        loop_time: 0,
        function: None,
        statement_index: -1,
        position: SourcePosition {
            script_id: 0,
            line: 0,
            column: 0,
        },
    };

    pub fn is_defined(&self) -> bool {
        self.event_time != -1
    }

    /// Whether this location executes strictly before `other`
    pub fn is_before(&self, other: &Self) -> bool {
        (
            self.event_time,
            self.function_time,
            self.loop_time,
            self.position.line,
            self.position.column,
        ) < (
            other.event_time,
            other.function_time,
            other.loop_time,
            other.position.line,
            other.position.column,
        )
    }

    /// Same statement at the same logical time
    pub fn same_time_and_position(&self, other: &Self) -> bool {
        self.event_time == other.event_time
            && self.function_time == other.function_time
            && self.loop_time == other.loop_time
            && self.position == other.position
    }

    /// Same source position, ignoring time
    pub fn same_position(&self, other: &Self) -> bool {
        self.position == other.position
    }
}

impl Default for TtdSourceLocation {
    fn default() -> Self {
        Self::UNDEFINED
    }
}

/// Breakpoint replay is moving to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveBreakpoint {
    pub id: i64,
    /// The breakpoint was created for this move and is removed once reached
    pub remove_when_done: bool,
    pub location: TtdSourceLocation,
}

/// Tracker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointState {
    NoPending,
    PendingSet,
    ActiveMoving,
    AtBreakpoint,
}

/// Pending and active breakpoint bookkeeping
#[derive(Debug, Clone, Default)]
pub struct BreakpointTracker {
    pending: Option<TtdSourceLocation>,
    active: Option<ActiveBreakpoint>,
    at_breakpoint: bool,
    break_on_first_user_code: bool,
    scan_list: Vec<TtdSourceLocation>,
    preserve_list: Vec<TtdSourceLocation>,
}

impl BreakpointTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BreakpointState {
        if self.at_breakpoint {
            BreakpointState::AtBreakpoint
        } else if self.active.is_some() {
            BreakpointState::ActiveMoving
        } else if self.pending.is_some() {
            BreakpointState::PendingSet
        } else {
            BreakpointState::NoPending
        }
    }

    /// Request a move to `location`, replacing any earlier request
    pub fn set_pending_ttd_bp_info(&mut self, location: TtdSourceLocation) {
        self.pending = Some(location);
        self.at_breakpoint = false;
    }

    pub fn has_pending_ttd_bp(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending_ttd_bp_info(&self) -> Option<&TtdSourceLocation> {
        self.pending.as_ref()
    }

    /// Target event time of the pending request, -1 if none
    pub fn pending_ttd_bp_target_event_time(&self) -> i64 {
        self.pending.map_or(-1, |loc| loc.event_time)
    }

    pub fn clear_pending_ttd_bp_info(&mut self) {
        self.pending = None;
    }

    /// Start moving toward a breakpoint
    pub fn set_active_bp(&mut self, id: i64, is_new_bp: bool, location: TtdSourceLocation) {
        self.active = Some(ActiveBreakpoint {
            id,
            remove_when_done: is_new_bp,
            location,
        });
        self.at_breakpoint = false;
    }

    pub fn has_active_bp(&self) -> bool {
        self.active.is_some()
    }

    pub fn active_bp_id(&self) -> i64 {
        self.active.map_or(NO_BREAKPOINT, |bp| bp.id)
    }

    pub fn active_bp(&self) -> Option<&ActiveBreakpoint> {
        self.active.as_ref()
    }

    /// Drop the active breakpoint. The caller removes it from the debugger
    /// when `remove_when_done` is set.
    pub fn clear_active_bp(&mut self) -> Option<ActiveBreakpoint> {
        self.at_breakpoint = false;
        self.active.take()
    }

    pub fn clear_bp_scan_list(&mut self) {
        self.scan_list.clear();
    }

    pub fn add_current_location_during_scan(&mut self, location: TtdSourceLocation) {
        self.scan_list.push(location);
    }

    pub fn scan_list(&self) -> &[TtdSourceLocation] {
        &self.scan_list
    }

    /// Retarget the pending breakpoint to the latest scanned location that
    /// executes strictly before it. Returns false when no scanned location
    /// qualifies.
    pub fn try_find_and_set_previous_bp(&mut self) -> bool {
        let Some(pending) = self.pending else {
            return false;
        };

        let previous = self
            .scan_list
            .iter()
            .filter(|loc| loc.is_before(&pending))
            .fold(None::<&TtdSourceLocation>, |best, loc| match best {
                Some(best) if !best.is_before(loc) => Some(best),
                _ => Some(loc),
            });

        match previous {
            Some(loc) => {
                tracing::debug!(
                    event_time = loc.event_time,
                    line = loc.position.line,
                    "Resolved previous breakpoint location"
                );
                self.pending = Some(*loc);
                true
            }
            None => false,
        }
    }

    /// Decide whether a breakpoint hit at `current` should stop execution.
    ///
    /// While a pending request is being scanned every hit is recorded and
    /// none break. While moving to an active breakpoint only that exact
    /// location and time breaks.
    pub fn process_bp_info_pre_break(&mut self, current: &TtdSourceLocation) -> bool {
        if self.pending.is_some() {
            self.scan_list.push(*current);
            return false;
        }

        if let Some(active) = &self.active
            && !active.location.same_time_and_position(current)
        {
            return false;
        }

        self.at_breakpoint = true;
        true
    }

    /// Resume after a break. Returns the active breakpoint if it was reached
    /// so the caller can remove a temporary breakpoint from the debugger.
    pub fn process_bp_info_post_break(&mut self) -> Option<ActiveBreakpoint> {
        if !self.at_breakpoint {
            return None;
        }
        self.at_breakpoint = false;
        self.active.take()
    }

    pub fn set_break_on_first_user_code(&mut self) {
        self.break_on_first_user_code = true;
    }

    /// Consume the first-user-code request if `just_my_code` marks user code
    pub fn check_break_on_first_user_code(&mut self, just_my_code: bool) -> bool {
        if self.break_on_first_user_code && just_my_code {
            self.break_on_first_user_code = false;
            return true;
        }
        false
    }

    /// Save the host's breakpoints before script contexts are recreated
    pub fn load_bp_list_for_context_recreate(
        &mut self,
        breakpoints: impl IntoIterator<Item = TtdSourceLocation>,
    ) {
        self.preserve_list.clear();
        self.preserve_list.extend(breakpoints);
    }

    /// Breakpoints the host must re-install in the fresh contexts
    pub fn restore_bp_list_after_context_recreate(&self) -> &[TtdSourceLocation] {
        &self.preserve_list
    }

    /// Forget the saved breakpoints once the move has finished
    pub fn unload_bp_list_after_move_for_context_recreate(&mut self) {
        self.preserve_list.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(event_time: i64, function_time: u64, line: u32) -> TtdSourceLocation {
        TtdSourceLocation {
            bp_id: 1,
            event_time,
            function_time,
            loop_time: 0,
            function: Some(FunctionId(1)),
            statement_index: line as i32,
            position: SourcePosition {
                script_id: 1,
                line,
                column: 0,
            },
        }
    }

    #[test]
    fn test_ordering() {
        assert!(loc(1, 5, 9).is_before(&loc(2, 0, 0)));
        assert!(loc(2, 1, 9).is_before(&loc(2, 2, 0)));
        assert!(loc(2, 2, 3).is_before(&loc(2, 2, 4)));
        assert!(!loc(2, 2, 4).is_before(&loc(2, 2, 4)));
    }

    #[test]
    fn test_state_transitions() {
        let mut tracker = BreakpointTracker::new();
        assert_eq!(tracker.state(), BreakpointState::NoPending);

        tracker.set_pending_ttd_bp_info(loc(4, 1, 10));
        assert_eq!(tracker.state(), BreakpointState::PendingSet);
        assert_eq!(tracker.pending_ttd_bp_target_event_time(), 4);

        tracker.clear_pending_ttd_bp_info();
        tracker.set_active_bp(3, true, loc(4, 1, 10));
        assert_eq!(tracker.state(), BreakpointState::ActiveMoving);

        assert!(!tracker.process_bp_info_pre_break(&loc(4, 1, 11)));
        assert!(tracker.process_bp_info_pre_break(&loc(4, 1, 10)));
        assert_eq!(tracker.state(), BreakpointState::AtBreakpoint);

        let reached = tracker.process_bp_info_post_break().unwrap();
        assert_eq!(reached.id, 3);
        assert!(reached.remove_when_done);
        assert_eq!(tracker.state(), BreakpointState::NoPending);
    }

    #[test]
    fn test_scan_resolves_latest_strictly_before() {
        let mut tracker = BreakpointTracker::new();
        tracker.set_pending_ttd_bp_info(loc(10, 3, 20));

        for candidate in [loc(2, 1, 20), loc(7, 4, 20), loc(10, 3, 20), loc(12, 1, 20), loc(7, 2, 20)] {
            assert!(!tracker.process_bp_info_pre_break(&candidate));
        }
        assert_eq!(tracker.scan_list().len(), 5);

        assert!(tracker.try_find_and_set_previous_bp());
        let resolved = tracker.pending_ttd_bp_info().unwrap();
        assert_eq!(resolved.event_time, 7);
        assert_eq!(resolved.function_time, 4);
    }

    #[test]
    fn test_scan_without_earlier_hit() {
        let mut tracker = BreakpointTracker::new();
        tracker.set_pending_ttd_bp_info(loc(3, 0, 1));
        tracker.add_current_location_during_scan(loc(5, 0, 1));
        assert!(!tracker.try_find_and_set_previous_bp());
        assert_eq!(tracker.pending_ttd_bp_target_event_time(), 3);

        tracker.clear_bp_scan_list();
        assert!(tracker.scan_list().is_empty());
    }

    #[test]
    fn test_break_on_first_user_code_fires_once() {
        let mut tracker = BreakpointTracker::new();
        tracker.set_break_on_first_user_code();
        assert!(!tracker.check_break_on_first_user_code(false));
        assert!(tracker.check_break_on_first_user_code(true));
        assert!(!tracker.check_break_on_first_user_code(true));
    }

    #[test]
    fn test_preserve_list() {
        let mut tracker = BreakpointTracker::new();
        tracker.load_bp_list_for_context_recreate([loc(1, 0, 1), loc(2, 0, 2)]);
        assert_eq!(tracker.restore_bp_list_after_context_recreate().len(), 2);
        tracker.unload_bp_list_after_move_for_context_recreate();
        assert!(tracker.restore_bp_list_after_context_recreate().is_empty());
    }
}
