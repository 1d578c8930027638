//! Snapshot cadence, seek, inflate and pruning
//!
//! Recording takes a snapshot at root boundaries once enough script
//! execution time has passed, and prunes history older than the configured
//! number of snapshots. Replay seeks to the newest snapshot at or before a
//! target time, inflates it, and re-executes root entries forward.

use std::ops::Bound;

use crate::error::{AbortReason, TtdError, TtdResult};
use crate::event::{EventKind, EventLogEntry, EventPayload};
use crate::host::{SnapshotSubsystem, TtdHost};
use crate::mode::TtdMode;
use crate::snapshot::{InflateMap, Snapshot};

use super::EventLog;

/// Result of choosing the snapshot to restore for a seek
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapSeek {
    /// Event time of the snapshot to inflate
    pub snap_time: i64,
    /// Whether the host must build fresh script contexts for the inflate
    pub new_ctxs_needed: bool,
    /// First full snapshot after the target, if any
    pub end_snap_time: Option<i64>,
}

impl EventLog {
    ////////
    // Cadence

    /// Whether enough script execution time has passed since the last snapshot
    pub fn is_time_for_snapshot(&self) -> bool {
        self.elapsed_execution_time_since_snapshot >= self.config.snapshot.interval_secs
    }

    /// Add script execution time toward the next snapshot
    pub fn increment_elapsed_snapshot_time(&mut self, secs: f64) {
        self.elapsed_execution_time_since_snapshot += secs;
    }

    /// Capture runtime state and append a snapshot entry for it
    pub fn do_snapshot_extract<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
    ) -> TtdResult<i64> {
        let data = {
            let _paused = self.pause_time_travel();
            snapshots.extract_snapshot()?
        };

        let snapshot_time = self.current_event_time();
        let snapshot = Snapshot::new(snapshot_time, data, false);
        self.record_event(
            EventKind::Snapshot,
            EventPayload::Snapshot {
                checksum: snapshot.checksum,
                ready_to_run: false,
            },
        );
        tracing::debug!(
            event_time = snapshot_time,
            bytes = snapshot.len(),
            elapsed = self.elapsed_execution_time_since_snapshot,
            "Snapshot taken"
        );
        self.snapshots.insert(snapshot_time, snapshot);
        self.elapsed_execution_time_since_snapshot = 0.0;
        Ok(snapshot_time)
    }

    /// Snapshot at a top-level call boundary if one is due.
    ///
    /// The first top-level call of a recording always snapshots so every
    /// recorded event has a snapshot to seek from.
    pub fn take_snapshot_if_needed<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
    ) -> TtdResult<()> {
        if !self.modes.is_record_mode() {
            return Ok(());
        }
        if self.snapshots.is_empty() || self.is_time_for_snapshot() {
            self.do_snapshot_extract(snapshots)?;
            self.prune_log_length();
        }
        Ok(())
    }

    /// During replay, snapshot the state just before a top-level call so
    /// later seeks into the call can start there
    pub fn do_rtr_snap_if_needed<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
    ) -> TtdResult<()> {
        if !self.config.snapshot.ready_to_run {
            return Ok(());
        }
        let Some(entry) = self.current_replay_entry() else {
            return Ok(());
        };
        let event_time = entry.event_time;
        let is_top_level_call = matches!(
            &entry.payload,
            EventPayload::CallFunction(data)
                if entry.kind == EventKind::CallExistingFunction && data.root_depth == 0
        );
        if !is_top_level_call || self.snapshots.contains_key(&event_time) {
            return Ok(());
        }

        let data = {
            let _paused = self.pause_time_travel();
            snapshots.extract_snapshot()?
        };
        tracing::trace!(event_time, bytes = data.len(), "Ready-to-run snapshot taken");
        self.snapshots
            .insert(event_time, Snapshot::new(event_time, data, true));
        Ok(())
    }

    ////////
    // Seek and inflate

    /// Pick the snapshot to restore when moving to `target`
    pub fn find_snap_time_for_event_time(
        &self,
        target: i64,
        allow_rtr: bool,
    ) -> TtdResult<SnapSeek> {
        let snap_time = self
            .snapshots
            .range(..=target)
            .rev()
            .find(|(_, snap)| allow_rtr || !snap.ready_to_run)
            .map(|(time, _)| *time)
            .ok_or(TtdError::NoSnapshot { event_time: target })?;

        let end_snap_time = self
            .snapshots
            .range((Bound::Excluded(target), Bound::Unbounded))
            .find(|(_, snap)| !snap.ready_to_run)
            .map(|(time, _)| *time);

        let new_ctxs_needed = match &self.last_inflate {
            None => true,
            Some(map) => {
                let cached = map.snapshot_time();
                let previous = self.snapshots.range(..snap_time).next_back().map(|(t, _)| *t);
                let next = self
                    .snapshots
                    .range((Bound::Excluded(snap_time), Bound::Unbounded))
                    .next()
                    .map(|(t, _)| *t);
                cached != snap_time && Some(cached) != previous && Some(cached) != next
            }
        };

        Ok(SnapSeek {
            snap_time,
            new_ctxs_needed,
            end_snap_time,
        })
    }

    /// Drop the inflate cache before the host recreates its script contexts.
    /// Returns whether a cache was dropped.
    pub fn update_inflate_map_for_fresh_script_contexts(&mut self) -> bool {
        self.last_inflate.take().is_some()
    }

    /// Restore runtime state from the snapshot at `event_time` and position
    /// replay on that snapshot's entry
    pub fn do_snapshot_inflate<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
        event_time: i64,
    ) -> TtdResult<()> {
        let snapshot = self
            .snapshots
            .get(&event_time)
            .ok_or(TtdError::NoSnapshot { event_time })?;
        if !snapshot.verify() {
            return Err(TtdError::SnapshotChecksum { event_time });
        }
        let cursor = self
            .events
            .find_event_time(event_time)
            .ok_or(TtdError::NoSnapshot { event_time })?;

        let mut map = match self.last_inflate.take() {
            Some(mut map) => {
                map.prepare_for_reuse(event_time);
                map
            }
            None => InflateMap::new(event_time),
        };

        self.modes.push_mode(TtdMode::EXCLUDED_EXECUTION);
        let inflated = snapshots.inflate_snapshot(&snapshot.data, &mut map);
        self.modes.pop_mode(TtdMode::EXCLUDED_EXECUTION);
        inflated?;

        tracing::debug!(
            event_time,
            reused = map.is_reused(),
            objects = map.len(),
            "Snapshot inflated"
        );
        self.last_inflate = Some(map);
        self.replay_cursor = cursor;
        self.event_time_ctr = event_time;
        self.elapsed_execution_time_since_snapshot = 0.0;
        self.reset_call_stack_for_top_level_call(-1, -1);
        Ok(())
    }

    /// Inflate map from the most recent inflate
    pub fn last_inflate_map(&self) -> Option<&InflateMap> {
        self.last_inflate.as_ref()
    }

    ////////
    // Replay driving

    /// Replay root entries until the clock reaches `event_time`
    pub fn replay_root_events_to_time<H: TtdHost + ?Sized>(
        &mut self,
        host: &mut H,
        event_time: i64,
    ) -> TtdResult<()> {
        while self.event_time_ctr < event_time {
            self.replay_single_root_entry(host)?;
        }
        Ok(())
    }

    /// Replay the root entry under the cursor
    pub fn replay_single_root_entry<H: TtdHost + ?Sized>(&mut self, host: &mut H) -> TtdResult<()> {
        let Some((kind, event_time)) = self
            .current_replay_entry()
            .map(|entry| (entry.kind, entry.event_time))
        else {
            return Err(self.abort_replay_return_to_host(AbortReason::EndOfLog));
        };
        match kind {
            EventKind::Snapshot => self.replay_snapshot_event(host),
            EventKind::EventLoopYieldPoint => self.replay_event_loop_yield_point(),
            kind if kind.is_action() => self.replay_single_action_event_entry(host),
            found => Err(TtdError::UnexpectedRootEvent { found, event_time }),
        }
    }

    /// Replay host actions until the clock passes `event_time`
    pub fn replay_action_event_sequence_through_time<H: TtdHost + ?Sized>(
        &mut self,
        host: &mut H,
        event_time: i64,
    ) -> TtdResult<()> {
        while self.event_time_ctr <= event_time {
            self.replay_single_action_event_entry(host)?;
        }
        Ok(())
    }

    /// Re-execute the action entry under the cursor through `host`
    pub fn replay_single_action_event_entry<H: TtdHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> TtdResult<()> {
        let Some(entry) = self.current_replay_entry().cloned() else {
            return Err(self.abort_replay_return_to_host(AbortReason::EndOfLog));
        };

        #[cfg(feature = "internal-diagnostics")]
        if entry.event_time != self.event_time_ctr {
            return Err(TtdError::TimeDesync {
                clock: self.event_time_ctr,
                cursor: entry.event_time,
            });
        }

        if !entry.kind.is_action() {
            return Err(TtdError::UnexpectedRootEvent {
                found: entry.kind,
                event_time: entry.event_time,
            });
        }
        if !entry.is_well_formed() {
            return Err(TtdError::LogCorruption {
                expected: entry.kind,
                found: entry.kind,
                event_time: entry.event_time,
            });
        }

        let top_level_callback = top_level_call_callback_id(&entry);
        if top_level_callback.is_some() {
            self.do_rtr_snap_if_needed(host)?;
        }

        self.advance_time_and_position_for_replay();

        if let Some(host_callback_id) = top_level_callback {
            self.reset_call_stack_for_top_level_call(entry.event_time, host_callback_id);
        }

        if let EventPayload::Integral { value, .. } = entry.payload
            && entry.kind == EventKind::HostExitProcess
        {
            return Err(self.abort_replay_return_to_host(AbortReason::HostExit {
                exit_code: value as i32,
            }));
        }

        {
            let mut nested = self.nesting_depth_guard();
            host.execute_action(&mut nested, &entry)?;
        }

        #[cfg(feature = "internal-diagnostics")]
        {
            let expected = entry.last_nested_event_time() + 1;
            if self.event_time_ctr != expected {
                return Err(TtdError::TimeDesync {
                    clock: self.event_time_ctr,
                    cursor: expected,
                });
            }
        }
        Ok(())
    }

    /// Consume a snapshot entry. With diagnostics enabled the state is
    /// re-extracted and compared against the recorded checksum.
    #[cfg_attr(not(feature = "internal-diagnostics"), allow(unused_variables))]
    pub fn replay_snapshot_event<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
    ) -> TtdResult<()> {
        let handle = self.replay_next_event(EventKind::Snapshot)?;
        self.elapsed_execution_time_since_snapshot = 0.0;

        #[cfg(feature = "internal-diagnostics")]
        {
            let event_time = self.events[handle].event_time;
            let EventPayload::Snapshot { checksum, .. } = self.events[handle].payload else {
                unreachable!("payload shape checked on replay");
            };
            let data = {
                let _paused = self.pause_time_travel();
                snapshots.extract_snapshot()?
            };
            if Snapshot::compute_checksum(&data) != checksum {
                return Err(TtdError::SnapshotChecksum { event_time });
            }
        }
        #[cfg(not(feature = "internal-diagnostics"))]
        let _ = handle;
        Ok(())
    }

    pub fn replay_event_loop_yield_point(&mut self) -> TtdResult<()> {
        self.replay_next_event(EventKind::EventLoopYieldPoint)?;
        Ok(())
    }

    /// Replay every remaining root entry
    pub fn replay_to_end<H: TtdHost + ?Sized>(&mut self, host: &mut H) -> TtdResult<()> {
        while self.current_replay_entry().is_some() {
            self.replay_single_root_entry(host)?;
        }
        Ok(())
    }

    /// Restore the nearest snapshot at or before `target` and replay forward
    /// until the clock reaches it
    pub fn move_to_time<H: TtdHost + ?Sized>(
        &mut self,
        host: &mut H,
        target: i64,
    ) -> TtdResult<SnapSeek> {
        let seek = self.find_snap_time_for_event_time(target, self.config.snapshot.ready_to_run)?;
        if seek.new_ctxs_needed {
            self.update_inflate_map_for_fresh_script_contexts();
        }
        tracing::debug!(
            target,
            snap_time = seek.snap_time,
            fresh = seek.new_ctxs_needed,
            "Moving to event time"
        );
        self.do_snapshot_inflate(host, seek.snap_time)?;
        self.replay_root_events_to_time(host, target)?;
        Ok(seek)
    }

    ////////
    // Pruning

    /// Drop events and snapshots older than the retained snapshot history
    pub fn prune_log_length(&mut self) {
        let keep = self.config.snapshot.history_length.max(1);
        let Some(first_kept) = self
            .snapshots
            .iter()
            .rev()
            .filter(|(_, snap)| !snap.ready_to_run)
            .nth(keep - 1)
            .map(|(time, _)| *time)
        else {
            return;
        };

        let mut pruned = 0usize;
        while let Some(handle) = self.events.first_handle() {
            if self.events[handle].event_time >= first_kept {
                break;
            }
            self.events.delete_first_entry(handle);
            pruned += 1;
        }
        self.snapshots = self.snapshots.split_off(&first_kept);

        if self
            .last_inflate
            .as_ref()
            .is_some_and(|map| map.snapshot_time() < first_kept)
        {
            self.last_inflate = None;
        }

        if pruned > 0 {
            tracing::debug!(pruned, first_kept, "Pruned log history");
        }
    }
}

/// Host callback id of a top-level `CallExistingFunction` entry
fn top_level_call_callback_id(entry: &EventLogEntry) -> Option<i64> {
    match &entry.payload {
        EventPayload::CallFunction(data)
            if entry.kind == EventKind::CallExistingFunction && data.root_depth == 0 =>
        {
            Some(data.host_callback_id)
        }
        _ => None,
    }
}
