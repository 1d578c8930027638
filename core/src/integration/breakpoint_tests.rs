//! Debugger navigation over replayed calls

use std::cell::Cell;
use std::rc::Rc;

use crate::breakpoint::{BreakpointState, NO_BREAKPOINT, TtdSourceLocation};
use crate::config::TtdConfig;
use crate::host::{FunctionId, TtdVar};
use crate::log::EventLog;
use crate::test_utils::{MockHost, recording_log};

use super::test_utils::*;

const MAIN: FunctionId = FunctionId(1);
const CALLBACK_ID: i64 = 7;

/// Statement offsets the mock script body steps through on every call
const STATEMENT_OFFSETS: [u32; 3] = [0, 10, 20];

fn replay_for_debugging(log: &EventLog) -> EventLog {
    let mut replay = reload_for_replay(log, TtdConfig::default());
    replay.set_into_debugging_mode();
    replay
}

/// Host whose replayed calls run three statements of `MAIN` and report each
/// one to the breakpoint layer. Returns the number of breaks taken.
fn stepping_host() -> (MockHost, Rc<Cell<u32>>) {
    let statements = MockHost::with_statements(MAIN, &[(0, 9), (10, 19), (20, 29)]);
    let breaks = Rc::new(Cell::new(0));
    let counter = Rc::clone(&breaks);

    let mut host = MockHost::new();
    host.on_call(move |log, _entry| {
        log.push_call_event(MAIN, &[], false);
        for offset in STATEMENT_OFFSETS {
            log.update_current_statement_info(offset, &statements);
            // Statements are only reported while a time-travel move is in progress
            let moving = log.has_pending_ttd_bp() || log.has_active_bp();
            if moving && log.process_bp_info_pre_break() {
                counter.set(counter.get() + 1);
                log.process_bp_info_post_break();
            }
        }
        log.pop_call_event(MAIN, None);
    });
    (host, breaks)
}

fn record_two_calls() -> EventLog {
    let mut log = recording_log();
    let mut host = MockHost::new();
    record_call_with_dates(&mut log, &mut host, -1, &[]);
    record_call_with_dates(&mut log, &mut host, -1, &[]);
    // Snapshot at 0, calls at 1 and 2
    assert_eq!(log.first_top_level_event_time(), Some(1));
    log
}

#[test]
fn test_callback_register_and_cancel_correlate() {
    let mut log = recording_log();
    let mut host = MockHost::new();
    log.record_js_rt_callback_operation(true, false, true, Some(FunctionId(5)), CALLBACK_ID);
    {
        let mut call = log
            .record_js_rt_call_function(&mut host, 0, CALLBACK_ID, TtdVar(1), &[])
            .unwrap();
        call.record_js_rt_callback_operation(false, true, false, None, CALLBACK_ID);
        call.set_result(TtdVar(0));
    }

    let mut replay = replay_for_debugging(&log);
    let checked = Rc::new(Cell::new(false));
    let seen = Rc::clone(&checked);
    let mut replay_host = MockHost::new();
    replay_host.on_call(move |log, _entry| {
        assert_eq!(log.current_host_callback_id(), CALLBACK_ID);
        let (register_time, data) = log.event_for_host_callback_id(true, CALLBACK_ID).unwrap();
        assert_eq!(register_time, 0);
        assert!(data.is_repeating);
        // The cancel has not been replayed yet
        assert!(log.event_for_host_callback_id(false, CALLBACK_ID).is_none());
        seen.set(true);
    });
    replay.replay_to_end(&mut replay_host).unwrap();
    assert!(checked.get());

    let (cancel_time, cancel) = replay.event_for_host_callback_id(false, CALLBACK_ID).unwrap();
    assert_eq!(cancel_time, 3);
    assert_eq!(cancel.register_event_time, 0);
    assert!(replay.event_for_host_callback_id(true, 99).is_none());
}

#[test]
fn test_scan_resolves_latest_location_before_target() {
    let log = record_two_calls();
    let mut replay = replay_for_debugging(&log);
    let (mut host, breaks) = stepping_host();

    // Step back from the second statement of the second call
    let target = TtdSourceLocation {
        event_time: 2,
        function_time: 1,
        function: Some(MAIN),
        statement_index: 1,
        position: crate::host::SourcePosition {
            script_id: MAIN.0,
            line: 2,
            column: 0,
        },
        ..TtdSourceLocation::UNDEFINED
    };
    replay.set_pending_ttd_bp_info(target);
    replay.clear_bp_scan_list();
    assert_eq!(replay.breakpoints().state(), BreakpointState::PendingSet);
    assert_eq!(replay.pending_ttd_bp_target_event_time(), 2);

    let seek = replay.move_to_time(&mut host, 0).unwrap();
    assert_eq!(seek.snap_time, 0);
    replay.replay_to_end(&mut host).unwrap();
    assert_eq!(breaks.get(), 0);
    assert_eq!(replay.breakpoints().scan_list().len(), 6);

    assert!(replay.try_find_and_set_previous_bp());
    let previous = *replay.pending_ttd_bp_info().unwrap();
    assert_eq!(previous.event_time, 2);
    assert_eq!(previous.statement_index, 0);
    assert!(previous.is_before(&target));

    // Move to the resolved location as a temporary breakpoint
    replay.clear_pending_ttd_bp_info();
    replay.set_active_bp(NO_BREAKPOINT, true, previous);
    assert_eq!(replay.breakpoints().state(), BreakpointState::ActiveMoving);

    replay.move_to_time(&mut host, 0).unwrap();
    replay.replay_to_end(&mut host).unwrap();
    assert_eq!(breaks.get(), 1);
    assert!(!replay.has_active_bp());
}

#[test]
fn test_scan_before_first_statement_finds_nothing() {
    let log = record_two_calls();
    let mut replay = replay_for_debugging(&log);
    let (mut host, _breaks) = stepping_host();

    let first = TtdSourceLocation {
        event_time: 1,
        function_time: 1,
        function: Some(MAIN),
        statement_index: 0,
        position: crate::host::SourcePosition {
            script_id: MAIN.0,
            line: 1,
            column: 0,
        },
        ..TtdSourceLocation::UNDEFINED
    };
    replay.set_pending_ttd_bp_info(first);
    replay.replay_to_end(&mut host).unwrap();
    assert!(!replay.try_find_and_set_previous_bp());
    assert_eq!(replay.pending_ttd_bp_info(), Some(&first));
}

#[test]
fn test_no_breaks_while_debugger_runs_code() {
    let log = record_two_calls();
    let mut replay = replay_for_debugging(&log);
    let (mut host, breaks) = stepping_host();

    let location = TtdSourceLocation {
        event_time: 1,
        function_time: 1,
        function: Some(MAIN),
        statement_index: 0,
        position: crate::host::SourcePosition {
            script_id: MAIN.0,
            line: 1,
            column: 0,
        },
        ..TtdSourceLocation::UNDEFINED
    };
    replay.set_active_bp(4, false, location);
    {
        let mut paused = replay.pause_time_travel();
        assert!(!paused.process_bp_info_pre_break());
    }
    replay.replay_to_end(&mut host).unwrap();
    assert_eq!(breaks.get(), 1);
}

#[test]
fn test_breakpoints_preserved_across_context_recreate() {
    let log = record_two_calls();
    let mut replay = replay_for_debugging(&log);
    let (mut host, _breaks) = stepping_host();

    let location = TtdSourceLocation {
        bp_id: 11,
        ..TtdSourceLocation::UNDEFINED
    };

    replay.move_to_time(&mut host, 2).unwrap();

    // Host tears down its script contexts before the next move
    replay.load_bp_list_for_context_recreate([location]);
    assert!(replay.update_inflate_map_for_fresh_script_contexts());

    let seek = replay.move_to_time(&mut host, 0).unwrap();
    assert!(seek.new_ctxs_needed);
    assert!(!host.inflates.last().unwrap().1);

    let restored = replay.restore_bp_list_after_context_recreate().to_vec();
    replay.unload_bp_list_after_move_for_context_recreate();
    assert_eq!(restored, vec![location]);
    assert!(replay.restore_bp_list_after_context_recreate().is_empty());
}
