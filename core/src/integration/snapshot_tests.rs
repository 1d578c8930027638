//! Snapshot seek and pruning over recorded sessions

use crate::error::TtdError;
use crate::event::EventKind;
use crate::test_utils::{MockHost, recording_log_with};

use super::test_utils::*;

const CALLS: usize = 6;

/// Each call records snapshot, call, date: snapshots sit at multiples of 3
fn record_session(history_length: usize) -> crate::log::EventLog {
    let mut log = recording_log_with(snapshot_every_call(history_length));
    let mut host = MockHost::new();
    for i in 0..CALLS {
        record_call_with_dates(&mut log, &mut host, -1, &[i as f64]);
    }
    log
}

#[test]
fn test_seek_snapshot_never_after_target() {
    let log = record_session(CALLS);
    let last = log.last_event_time();
    for target in 0..=last {
        let seek = log.find_snap_time_for_event_time(target, false).unwrap();
        assert!(seek.snap_time <= target);
        assert!(target - seek.snap_time < 3);
        if let Some(end) = seek.end_snap_time {
            assert!(end > target);
        }
    }
}

#[test]
fn test_move_to_time_then_replay_matches_recording() {
    let log = record_session(CALLS);
    let mut replay = reload_for_replay(&log, snapshot_every_call(CALLS));
    let mut host = MockHost::new();

    replay.move_to_time(&mut host, 10).unwrap();
    assert!(replay.current_event_time() >= 10);
    replay.replay_to_end(&mut host).unwrap();

    // Calls from the snapshot at 9 onward re-read their dates
    assert_eq!(host.replayed_dates(), &[3.0, 4.0, 5.0]);
    assert_eq!(host.inflates.len(), 1);
}

#[test]
fn test_seek_backward_after_replaying_forward() {
    let log = record_session(CALLS);
    let mut replay = reload_for_replay(&log, snapshot_every_call(CALLS));
    let mut host = MockHost::new();

    replay.move_to_time(&mut host, 15).unwrap();
    let far = replay.move_to_time(&mut host, 2).unwrap();
    assert_eq!(far.snap_time, 0);
    assert!(far.new_ctxs_needed);

    let near = replay.move_to_time(&mut host, 4).unwrap();
    assert_eq!(near.snap_time, 3);
    assert!(!near.new_ctxs_needed);
    assert_eq!(host.inflates.last(), Some(&(host.inflates[0].0, true)));
}

#[test]
fn test_prune_keeps_everything_from_oldest_snapshot() {
    let log = record_session(2);
    let snapshot_times: Vec<i64> = log.snapshots().keys().copied().collect();
    assert_eq!(snapshot_times, vec![12, 15]);

    let first = log.events().iter().next().unwrap();
    assert_eq!(first.event_time, 12);
    assert_eq!(first.kind, EventKind::Snapshot);

    // No gaps from the oldest retained snapshot to the end
    let times: Vec<i64> = log.events().iter().map(|e| e.event_time).collect();
    assert_eq!(times, (12..=17).collect::<Vec<_>>());
}

#[test]
fn test_pruned_log_replays_from_oldest_snapshot() {
    let log = record_session(2);
    let mut replay = reload_for_replay(&log, snapshot_every_call(2));
    let mut host = MockHost::new();

    assert!(matches!(
        replay.move_to_time(&mut host, 5),
        Err(TtdError::NoSnapshot { event_time: 5 })
    ));

    replay.move_to_time(&mut host, 12).unwrap();
    replay.replay_to_end(&mut host).unwrap();
    assert_eq!(host.replayed_dates(), &[4.0, 5.0]);
}
