//! Integration tests for the event log
//!
//! Tests full record, emit, load and replay sessions, snapshot seeking and
//! pruning, and debugger navigation over replayed calls.

#[cfg(all(test, feature = "debugging"))]
mod breakpoint_tests;
#[cfg(test)]
mod snapshot_tests;

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::config::TtdConfig;
    use crate::host::TtdVar;
    use crate::log::EventLog;
    use crate::test_utils::MockHost;

    /// Record one top-level call whose body reads the clock once per entry
    /// in `dates`
    pub fn record_call_with_dates(
        log: &mut EventLog,
        host: &mut MockHost,
        host_callback_id: i64,
        dates: &[f64],
    ) {
        let mut call = log
            .record_js_rt_call_function(host, 0, host_callback_id, TtdVar(1), &[])
            .unwrap();
        for &date in dates {
            call.record_date_time_event(date);
        }
        call.set_result(TtdVar(0));
    }

    /// Emit `log` to memory and load it into a fresh log ready for replay
    pub fn reload_for_replay(log: &EventLog, config: TtdConfig) -> EventLog {
        let mut buffer = Vec::new();
        log.emit_log_to(&mut buffer).unwrap();

        let mut replay = EventLog::new(config);
        replay.parse_log_from(buffer.as_slice()).unwrap();
        replay.init_for_ttd_replay();
        replay
    }

    /// Config that snapshots before every top-level call
    pub fn snapshot_every_call(history_length: usize) -> TtdConfig {
        let mut config = TtdConfig::default();
        config.snapshot.interval_secs = 0.0;
        config.snapshot.history_length = history_length;
        config
    }
}
