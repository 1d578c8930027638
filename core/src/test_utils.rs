//! Shared test utilities for integration and unit tests

use hashbrown::HashMap;

use crate::config::TtdConfig;
use crate::error::{HostError, TtdError, TtdResult};
use crate::event::{EventKind, EventLogEntry, EventPayload};
use crate::host::{FunctionId, ScriptRuntime, SnapshotSubsystem, SourcePosition, StatementSpan};
use crate::log::EventLog;
use crate::snapshot::InflateMap;

// ============================================================================
// Mock Host Implementation
// ============================================================================

/// Script body run when a recorded call is replayed, before its nested events
pub type CallBody = Box<dyn FnMut(&mut EventLog, &EventLogEntry)>;

/// Host stand-in for tests.
///
/// Replays nested events of script calls generically by reading the kind of
/// each entry under the cursor, and keeps a constant snapshot state unless a
/// test changes it.
pub struct MockHost {
    statements: HashMap<FunctionId, Vec<(u32, u32)>>,
    executed: Vec<EventKind>,
    replayed_dates: Vec<f64>,
    state: Vec<u8>,
    pub extract_count: usize,
    /// (snapshot bytes, map reused) per inflate
    pub inflates: Vec<(usize, bool)>,
    call_body: Option<CallBody>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            statements: HashMap::new(),
            executed: Vec::new(),
            replayed_dates: Vec::new(),
            state: b"mock runtime state".to_vec(),
            extract_count: 0,
            inflates: Vec::new(),
            call_body: None,
        }
    }

    /// Host whose `function` has one statement per bytecode range.
    /// Statement `i` sits on line `i + 1`.
    pub fn with_statements(function: FunctionId, ranges: &[(u32, u32)]) -> Self {
        let mut host = Self::new();
        host.add_statements(function, ranges);
        host
    }

    pub fn add_statements(&mut self, function: FunctionId, ranges: &[(u32, u32)]) {
        self.statements.insert(function, ranges.to_vec());
    }

    /// Run `body` at the start of every replayed script call
    pub fn on_call(&mut self, body: impl FnMut(&mut EventLog, &EventLogEntry) + 'static) {
        self.call_body = Some(Box::new(body));
    }

    pub fn set_state(&mut self, state: &[u8]) {
        self.state = state.to_vec();
    }

    /// Kinds of the actions executed through [`ScriptRuntime::execute_action`]
    pub fn executed_kinds(&self) -> Vec<EventKind> {
        self.executed.clone()
    }

    /// Date values script code observed during replay
    pub fn replayed_dates(&self) -> &[f64] {
        &self.replayed_dates
    }

    fn replay_nested(&mut self, log: &mut EventLog, through: i64) -> TtdResult<()> {
        while log.current_event_time() <= through {
            let Some(entry) = log.current_replay_entry().cloned() else {
                return Ok(());
            };
            match entry.kind {
                EventKind::DateTime => {
                    let time = log.replay_date_time_event()?;
                    self.replayed_dates.push(time);
                }
                EventKind::DateString => {
                    log.replay_date_string_event()?;
                }
                EventKind::RandomSeed => {
                    log.replay_external_entropy_random_event()?;
                }
                EventKind::PropertyEnum => {
                    log.replay_property_enum_event()?;
                }
                EventKind::SymbolCreation => {
                    log.replay_symbol_creation_event()?;
                }
                EventKind::TelemetryLog => {
                    log.replay_telemetry_log_event()?;
                }
                EventKind::TopLevelCode => {
                    log.replay_top_level_code_action()?;
                }
                EventKind::ExternalCall => {
                    let EventPayload::ExternalCall(data) = &entry.payload else {
                        unreachable!("external call payload");
                    };
                    log.replay_external_call_event(self, data.function)?;
                }
                EventKind::EnqueueTask => {
                    log.replay_enqueue_task_event(self)?;
                }
                kind if kind.is_action() => log.replay_single_action_event_entry(self)?,
                found => {
                    return Err(TtdError::UnexpectedRootEvent {
                        found,
                        event_time: entry.event_time,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptRuntime for MockHost {
    fn statement_at(&self, function: FunctionId, bytecode_offset: u32) -> Option<StatementSpan> {
        let ranges = self.statements.get(&function)?;
        ranges
            .iter()
            .enumerate()
            .find(|(_, (min, max))| *min <= bytecode_offset && bytecode_offset <= *max)
            .map(|(index, &(min, max))| StatementSpan {
                index: index as i32,
                bytecode_min: min,
                bytecode_max: max,
                position: SourcePosition {
                    script_id: function.0,
                    line: index as u32 + 1,
                    column: 0,
                },
            })
    }

    fn execute_action(&mut self, log: &mut EventLog, entry: &EventLogEntry) -> TtdResult<()> {
        self.executed.push(entry.kind);
        if matches!(
            entry.kind,
            EventKind::CallExistingFunction | EventKind::ConstructCall
        ) {
            if let Some(body) = self.call_body.as_mut() {
                body(log, entry);
            }
            self.replay_nested(log, entry.last_nested_event_time())?;
        }
        Ok(())
    }
}

impl SnapshotSubsystem for MockHost {
    fn extract_snapshot(&mut self) -> Result<Vec<u8>, HostError> {
        self.extract_count += 1;
        Ok(self.state.clone())
    }

    fn inflate_snapshot(&mut self, data: &[u8], map: &mut InflateMap) -> Result<(), HostError> {
        if data.is_empty() {
            return Err(HostError::new("inflate_snapshot", "empty snapshot"));
        }
        self.inflates.push((data.len(), map.is_reused()));
        self.state = data.to_vec();
        map.insert(0, crate::host::TtdVar(1));
        Ok(())
    }
}

/// Log initialized for recording with default configuration
pub fn recording_log() -> EventLog {
    recording_log_with(TtdConfig::default())
}

/// Log initialized for recording with `config`
pub fn recording_log_with(config: TtdConfig) -> EventLog {
    let mut log = EventLog::new(config);
    log.init_for_ttd_record();
    log
}
