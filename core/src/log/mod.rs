//! Event log engine
//!
//! [`EventLog`] is the single record of what a script did that the host could
//! observe, in order. In record mode every nondeterministic action appends an
//! entry and real execution proceeds. In replay mode the same calls read the
//! next entry, check its kind, and hand back the recorded outputs instead of
//! touching the real clock, random source or host APIs.
//!
//! The replay cursor and the logical clock always move together: consuming
//! an entry sets the clock to one past its event time.
//!
//! The engine is split across files by concern:
//! - `actions` - host API (JsRT) action recording
//! - `guards` - scoped completion and bracketing guards
//! - `snapshots` - snapshot cadence, seek, inflate and pruning
//! - `navigation` - debugger position queries (feature `debugging`)

mod actions;
mod guards;
#[cfg(feature = "debugging")]
mod navigation;
mod snapshots;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::binary::{LogBody, LogFlags, LogHeader, LogReader, LogWriter};
use crate::callstack::CallStackShadow;
use crate::config::TtdConfig;
use crate::error::{AbortReason, TtdError, TtdResult};
use crate::event::{
    ActionStatus, CallbackOperationData, EventCursor, EventHandle, EventKind, EventList,
    EventLogEntry, EventPayload, ExternalCallData, PropertyEnumStep,
};
use crate::host::{ContextId, FunctionId, PropertyId, ScriptRuntime, TtdHost, TtdVar};
use crate::mode::{ModeStack, TtdMode};
use crate::snapshot::{InflateMap, Snapshot};

#[cfg(feature = "debugging")]
use crate::breakpoint::BreakpointTracker;

pub use actions::JsErrorKind;
pub use guards::{
    ActionResultRecorder, CallFrameGuard, CallFunctionRecorder, NestingDepthGuard, TimeTravelPause,
};
pub use snapshots::SnapSeek;

/// Property record pinned for the lifetime of the log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub pid: PropertyId,
    pub name: String,
    pub is_symbol: bool,
    pub is_numeric: bool,
}

/// How a top-level script body was created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    /// Script loaded by the host
    Load { load_flag: u32, document_id: u64 },
    /// Body of a `new Function(...)`
    NewFunction,
    /// Body of an `eval`
    Eval {
        flags: u32,
        register_document: bool,
        is_indirect: bool,
        strict_mode: bool,
    },
}

/// Top-level script body retained so replay can recreate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelScript {
    pub kind: ScriptKind,
    /// Counter id the runtime assigned to the function body
    pub body_counter_id: u64,
    pub module_id: u64,
    pub source: Vec<u8>,
}

/// How an external call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalCallOutcome {
    Returned(TtdVar),
    Threw,
}

/// Recorded result of a property enumeration step
pub type PropertyEnumResult = PropertyEnumStep;

/// Deterministic record/replay event log for one runtime
pub struct EventLog {
    config: TtdConfig,

    /// Next event time to assign (record) or expect (replay)
    event_time_ctr: i64,
    timer: Instant,

    events: EventList,
    replay_cursor: EventCursor,

    call_stack: CallStackShadow,
    modes: ModeStack,

    /// Script context running under time travel
    context: Option<ContextId>,

    /// Script execution time since the last snapshot, in seconds
    elapsed_execution_time_since_snapshot: f64,
    snapshots: BTreeMap<i64, Snapshot>,
    /// Map from the most recent inflate, reused by nearby seeks
    last_inflate: Option<InflateMap>,

    property_records: Vec<PropertyRecord>,
    property_record_ids: HashSet<PropertyId>,
    top_level_scripts: Vec<TopLevelScript>,

    /// Depth of host actions currently executing
    root_nesting_depth: u32,
    just_my_code: Box<dyn Fn(FunctionId) -> bool>,
    /// Buffers registered for async modification, with their start index
    pending_async_mods: Vec<(TtdVar, u32)>,

    #[cfg(feature = "debugging")]
    breakpoints: BreakpointTracker,
}

impl EventLog {
    /// Create a log that has not started time travel yet
    pub fn new(config: TtdConfig) -> Self {
        let events = EventList::new(config.log.block_capacity.max(1));
        #[cfg_attr(not(feature = "debugging"), allow(unused_mut))]
        let mut log = Self {
            event_time_ctr: 0,
            timer: Instant::now(),
            events,
            replay_cursor: EventCursor::INVALID,
            call_stack: CallStackShadow::new(),
            modes: ModeStack::new(TtdMode::PENDING),
            context: None,
            elapsed_execution_time_since_snapshot: 0.0,
            snapshots: BTreeMap::new(),
            last_inflate: None,
            property_records: Vec::new(),
            property_record_ids: HashSet::new(),
            top_level_scripts: Vec::new(),
            root_nesting_depth: 0,
            just_my_code: Box::new(|_| true),
            pending_async_mods: Vec::new(),
            #[cfg(feature = "debugging")]
            breakpoints: BreakpointTracker::new(),
            config,
        };
        #[cfg(feature = "debugging")]
        if log.config.debugger.break_on_first_user_code {
            log.breakpoints.set_break_on_first_user_code();
        }
        log
    }

    pub fn config(&self) -> &TtdConfig {
        &self.config
    }

    ////////
    // Lifecycle

    /// Prepare an empty log for recording
    pub fn init_for_ttd_record(&mut self) {
        self.events.unload_event_list();
        self.event_time_ctr = 0;
        self.replay_cursor = EventCursor::INVALID;
        self.elapsed_execution_time_since_snapshot = 0.0;
        self.modes.set_global_mode(TtdMode::RECORD_ENABLED);
        tracing::info!("Time travel recording initialized");
    }

    /// Prepare a loaded log for replay from its first entry
    pub fn init_for_ttd_replay(&mut self) {
        self.replay_cursor = self.events.iter_at_first();
        self.event_time_ctr = self
            .events
            .iter()
            .next()
            .map_or(0, |entry| entry.event_time);
        self.modes.set_global_mode(TtdMode::REPLAY_ENABLED);
        tracing::info!(
            events = self.events.count(),
            snapshots = self.snapshots.len(),
            "Time travel replay initialized"
        );
    }

    /// Attach time travel to a script context
    pub fn start_time_travel_on_script(&mut self, context: ContextId) {
        debug_assert!(self.context.is_none(), "only one script context is supported");
        self.context = Some(context);
        tracing::debug!(context = context.0, "Time travel started on script context");
    }

    /// Detach time travel from a script context
    pub fn stop_time_travel_on_script(&mut self, context: ContextId) {
        if self.context == Some(context) {
            self.context = None;
            self.modes.set_global_mode(TtdMode::DETACHED);
            tracing::debug!(context = context.0, "Time travel stopped on script context");
        }
    }

    pub fn context(&self) -> Option<ContextId> {
        self.context
    }

    /// Enable debugging on top of replay
    pub fn set_into_debugging_mode(&mut self) {
        let global = self.modes.global_mode();
        debug_assert!(
            global.contains(TtdMode::REPLAY_ENABLED),
            "debugging requires replay mode"
        );
        self.modes.set_global_mode(global | TtdMode::DEBUGGING_ENABLED);
    }

    /// Release pinned property records, scripts, snapshots and the inflate cache
    pub fn unload_retained_data(&mut self) {
        self.property_records.clear();
        self.property_record_ids.clear();
        self.top_level_scripts.clear();
        self.snapshots.clear();
        self.last_inflate = None;
        self.pending_async_mods.clear();
    }

    /// Install the predicate that marks functions as user code
    pub fn set_just_my_code_filter(&mut self, filter: impl Fn(FunctionId) -> bool + 'static) {
        self.just_my_code = Box::new(filter);
    }

    pub fn is_function_just_my_code(&self, function: FunctionId) -> bool {
        (self.just_my_code)(function)
    }

    ////////
    // Modes

    pub fn set_global_mode(&mut self, mode: TtdMode) {
        self.modes.set_global_mode(mode);
    }

    pub fn push_mode(&mut self, mode: TtdMode) {
        self.modes.push_mode(mode);
    }

    pub fn pop_mode(&mut self, mode: TtdMode) {
        self.modes.pop_mode(mode);
    }

    pub fn modes(&self) -> &ModeStack {
        &self.modes
    }

    #[inline]
    pub fn should_perform_record_action(&self) -> bool {
        self.modes.should_perform_record_action()
    }

    #[inline]
    pub fn should_perform_debug_action(&self) -> bool {
        self.modes.should_perform_debug_action()
    }

    /// Exclude the debugger's own runtime work from the log
    pub fn pause_time_travel_before_runtime_operation(&mut self) {
        self.modes.push_mode(TtdMode::EXCLUDED_EXECUTION);
    }

    /// Undo [`Self::pause_time_travel_before_runtime_operation`]
    pub fn restart_time_travel_after_runtime_operation(&mut self) {
        self.modes.pop_mode(TtdMode::EXCLUDED_EXECUTION);
    }

    /// Scoped form of the pause/restart bracket
    pub fn pause_time_travel(&mut self) -> TimeTravelPause<'_> {
        TimeTravelPause::new(self)
    }

    ////////
    // Pinned runtime data

    /// Pin a property record; records are kept once per property id
    pub fn add_property_record(&mut self, record: PropertyRecord) {
        if self.property_record_ids.insert(record.pid) {
            self.property_records.push(record);
        }
    }

    pub fn property_records(&self) -> &[PropertyRecord] {
        &self.property_records
    }

    pub fn is_property_record_ref(&self, pid: PropertyId) -> bool {
        self.property_record_ids.contains(&pid)
    }

    /// Retain a host-loaded script and return its index
    pub fn add_script_load(
        &mut self,
        body_counter_id: u64,
        module_id: u64,
        document_id: u64,
        source: &[u8],
        load_flag: u32,
    ) -> usize {
        self.add_top_level_script(TopLevelScript {
            kind: ScriptKind::Load {
                load_flag,
                document_id,
            },
            body_counter_id,
            module_id,
            source: source.to_vec(),
        })
    }

    /// Retain a `new Function` body and return its index
    pub fn add_new_function(&mut self, body_counter_id: u64, module_id: u64, source: &str) -> usize {
        self.add_top_level_script(TopLevelScript {
            kind: ScriptKind::NewFunction,
            body_counter_id,
            module_id,
            source: source.as_bytes().to_vec(),
        })
    }

    /// Retain an `eval` body and return its index
    #[allow(clippy::too_many_arguments)]
    pub fn add_eval_function(
        &mut self,
        body_counter_id: u64,
        module_id: u64,
        source: &str,
        flags: u32,
        register_document: bool,
        is_indirect: bool,
        strict_mode: bool,
    ) -> usize {
        self.add_top_level_script(TopLevelScript {
            kind: ScriptKind::Eval {
                flags,
                register_document,
                is_indirect,
                strict_mode,
            },
            body_counter_id,
            module_id,
            source: source.as_bytes().to_vec(),
        })
    }

    fn add_top_level_script(&mut self, script: TopLevelScript) -> usize {
        self.top_level_scripts.push(script);
        self.top_level_scripts.len() - 1
    }

    pub fn top_level_scripts(&self) -> &[TopLevelScript] {
        &self.top_level_scripts
    }

    ////////
    // Clock and cursor

    fn current_event_time_and_advance(&mut self) -> i64 {
        let time = self.event_time_ctr;
        self.event_time_ctr += 1;
        time
    }

    /// Most recently assigned (record) or consumed (replay) event time
    pub fn last_event_time(&self) -> i64 {
        self.event_time_ctr - 1
    }

    /// Event time the next entry gets or is expected to have
    pub fn current_event_time(&self) -> i64 {
        self.event_time_ctr
    }

    /// Seconds since the log was created
    pub fn current_wall_time(&self) -> f64 {
        self.timer.elapsed().as_secs_f64()
    }

    fn advance_time_and_position_for_replay(&mut self) {
        let time = self.replay_cursor.current(&self.events).event_time;
        self.event_time_ctr = time + 1;
        self.replay_cursor.move_next(&self.events);
    }

    /// Entry the replay cursor points at
    pub fn current_replay_entry(&self) -> Option<&EventLogEntry> {
        self.replay_cursor.handle().and_then(|h| self.events.get(h))
    }

    pub fn events(&self) -> &EventList {
        &self.events
    }

    pub fn snapshots(&self) -> &BTreeMap<i64, Snapshot> {
        &self.snapshots
    }

    pub fn root_nesting_depth(&self) -> u32 {
        self.root_nesting_depth
    }

    pub fn nesting_depth_guard(&mut self) -> NestingDepthGuard<'_> {
        NestingDepthGuard::new(self)
    }

    ////////
    // Record/replay helpers

    fn record_event(&mut self, kind: EventKind, payload: EventPayload) -> EventHandle {
        let time = self.current_event_time_and_advance();
        self.events
            .get_next_available_entry(EventLogEntry::new(kind, time, payload))
    }

    fn record_pending_event(&mut self, kind: EventKind, payload: EventPayload) -> EventHandle {
        let time = self.current_event_time_and_advance();
        self.events
            .get_next_available_entry(EventLogEntry::pending(kind, time, payload))
    }

    /// Consume the next entry, which must be of kind `expected`
    fn replay_next_event(&mut self, expected: EventKind) -> TtdResult<EventHandle> {
        let Some(handle) = self.replay_cursor.handle() else {
            return Err(self.abort_replay_return_to_host(AbortReason::EndOfLog));
        };
        let entry = &self.events[handle];

        #[cfg(feature = "internal-diagnostics")]
        if entry.event_time != self.event_time_ctr {
            return Err(TtdError::TimeDesync {
                clock: self.event_time_ctr,
                cursor: entry.event_time,
            });
        }

        if entry.kind != expected || !entry.is_well_formed() {
            return Err(TtdError::LogCorruption {
                expected,
                found: entry.kind,
                event_time: entry.event_time,
            });
        }

        self.advance_time_and_position_for_replay();
        Ok(handle)
    }

    fn replayed(&self, handle: EventHandle) -> &EventLogEntry {
        &self.events[handle]
    }

    /// Hand control back to the replay driver
    pub fn abort_replay_return_to_host(&self, reason: AbortReason) -> TtdError {
        tracing::debug!(%reason, event_time = self.event_time_ctr, "Aborting replay");
        TtdError::Abort(reason)
    }

    ////////
    // Nondeterministic values

    /// Record an event generated by user telemetry
    pub fn record_telemetry_log_event(&mut self, info: &str, do_print: bool) {
        self.record_event(
            EventKind::TelemetryLog,
            EventPayload::Telemetry {
                info: info.to_string(),
                do_print,
            },
        );
    }

    /// Replay a telemetry event; returns the info string if it should be printed
    pub fn replay_telemetry_log_event(&mut self) -> TtdResult<Option<String>> {
        let handle = self.replay_next_event(EventKind::TelemetryLog)?;
        match &self.replayed(handle).payload {
            EventPayload::Telemetry { info, do_print } => Ok(do_print.then(|| info.clone())),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    pub fn record_date_time_event(&mut self, time: f64) {
        self.record_event(EventKind::DateTime, EventPayload::DateTime { time });
    }

    pub fn replay_date_time_event(&mut self) -> TtdResult<f64> {
        let handle = self.replay_next_event(EventKind::DateTime)?;
        match self.replayed(handle).payload {
            EventPayload::DateTime { time } => Ok(time),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    pub fn record_date_string_event(&mut self, value: &str) {
        self.record_event(
            EventKind::DateString,
            EventPayload::DateString {
                value: value.to_string(),
            },
        );
    }

    pub fn replay_date_string_event(&mut self) -> TtdResult<String> {
        let handle = self.replay_next_event(EventKind::DateString)?;
        match &self.replayed(handle).payload {
            EventPayload::DateString { value } => Ok(value.clone()),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    /// Record a random seed drawn from external entropy
    pub fn record_external_entropy_random_event(&mut self, seed0: u64, seed1: u64) {
        self.record_event(
            EventKind::RandomSeed,
            EventPayload::RandomSeed { seed0, seed1 },
        );
    }

    pub fn replay_external_entropy_random_event(&mut self) -> TtdResult<(u64, u64)> {
        let handle = self.replay_next_event(EventKind::RandomSeed)?;
        match self.replayed(handle).payload {
            EventPayload::RandomSeed { seed0, seed1 } => Ok((seed0, seed1)),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    /// Record one property enumeration step
    pub fn record_property_enum_event(
        &mut self,
        return_code: bool,
        pid: PropertyId,
        attributes: u8,
        name: Option<&str>,
    ) {
        self.record_event(
            EventKind::PropertyEnum,
            EventPayload::PropertyEnum(PropertyEnumStep {
                return_code,
                pid,
                attributes,
                name: name.map(str::to_string),
            }),
        );
    }

    pub fn replay_property_enum_event(&mut self) -> TtdResult<PropertyEnumResult> {
        let handle = self.replay_next_event(EventKind::PropertyEnum)?;
        match &self.replayed(handle).payload {
            EventPayload::PropertyEnum(step) => Ok(step.clone()),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    pub fn record_symbol_creation_event(&mut self, pid: PropertyId) {
        self.record_event(
            EventKind::SymbolCreation,
            EventPayload::SymbolCreation { pid },
        );
    }

    pub fn replay_symbol_creation_event(&mut self) -> TtdResult<PropertyId> {
        let handle = self.replay_next_event(EventKind::SymbolCreation)?;
        match self.replayed(handle).payload {
            EventPayload::SymbolCreation { pid } => Ok(pid),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    /// Record that a top-level script body started running
    pub fn record_top_level_code_action(&mut self, body_counter_id: u64) {
        self.record_event(
            EventKind::TopLevelCode,
            EventPayload::TopLevelCode { body_counter_id },
        );
    }

    pub fn replay_top_level_code_action(&mut self) -> TtdResult<u64> {
        let handle = self.replay_next_event(EventKind::TopLevelCode)?;
        match self.replayed(handle).payload {
            EventPayload::TopLevelCode { body_counter_id } => Ok(body_counter_id),
            _ => unreachable!("payload shape checked on replay"),
        }
    }

    ////////
    // Two-phase events

    /// Record the start of a call from script into a host function
    pub fn record_external_call_event(
        &mut self,
        function: FunctionId,
        root_nesting_depth: u32,
        args: &[TtdVar],
    ) -> EventHandle {
        self.record_pending_event(
            EventKind::ExternalCall,
            EventPayload::ExternalCall(ExternalCallData {
                function,
                root_nesting_depth,
                args: args.iter().copied().collect(),
                result: None,
                threw: false,
                last_nested_event_time: -1,
            }),
        )
    }

    /// Record how the host function ended
    pub fn record_external_call_event_complete(
        &mut self,
        handle: EventHandle,
        outcome: ExternalCallOutcome,
    ) {
        let last_nested_event_time = self.last_event_time();
        let Some(entry) = self.events.get_mut(handle) else {
            tracing::warn!("External call completed after its entry was pruned");
            return;
        };
        if let EventPayload::ExternalCall(data) = &mut entry.payload {
            match outcome {
                ExternalCallOutcome::Returned(value) => data.result = Some(value),
                ExternalCallOutcome::Threw => data.threw = true,
            }
            data.last_nested_event_time = last_nested_event_time;
        }
        entry.status = ActionStatus::Complete;
    }

    /// Replay a call into a host function.
    ///
    /// Host actions the function issued while it ran are re-executed through
    /// `host` before the recorded outcome is returned.
    pub fn replay_external_call_event<H: TtdHost + ?Sized>(
        &mut self,
        host: &mut H,
        function: FunctionId,
    ) -> TtdResult<ExternalCallOutcome> {
        let handle = self.replay_next_event(EventKind::ExternalCall)?;
        let (outcome, last_nested, recorded_function) = match &self.replayed(handle).payload {
            EventPayload::ExternalCall(data) => (
                match (data.threw, data.result) {
                    (false, Some(value)) => ExternalCallOutcome::Returned(value),
                    _ => ExternalCallOutcome::Threw,
                },
                data.last_nested_event_time,
                data.function,
            ),
            _ => unreachable!("payload shape checked on replay"),
        };
        debug_assert_eq!(recorded_function, function, "external call target diverged");

        self.replay_action_event_sequence_through_time(host, last_nested)?;
        Ok(outcome)
    }

    /// Record that script enqueued a task with the host
    pub fn record_enqueue_task_event(&mut self, task: TtdVar) -> EventHandle {
        self.record_pending_event(
            EventKind::EnqueueTask,
            EventPayload::EnqueueTask {
                task,
                last_nested_event_time: -1,
            },
        )
    }

    pub fn record_enqueue_task_event_complete(&mut self, handle: EventHandle) {
        let last = self.last_event_time();
        let Some(entry) = self.events.get_mut(handle) else {
            tracing::warn!("Enqueue task completed after its entry was pruned");
            return;
        };
        if let EventPayload::EnqueueTask {
            last_nested_event_time,
            ..
        } = &mut entry.payload
        {
            *last_nested_event_time = last;
        }
        entry.status = ActionStatus::Complete;
    }

    /// Replay a task enqueue and the host actions it triggered
    pub fn replay_enqueue_task_event<H: TtdHost + ?Sized>(
        &mut self,
        host: &mut H,
    ) -> TtdResult<TtdVar> {
        let handle = self.replay_next_event(EventKind::EnqueueTask)?;
        let (task, last_nested) = match self.replayed(handle).payload {
            EventPayload::EnqueueTask {
                task,
                last_nested_event_time,
            } => (task, last_nested_event_time),
            _ => unreachable!("payload shape checked on replay"),
        };
        self.replay_action_event_sequence_through_time(host, last_nested)?;
        Ok(task)
    }

    ////////
    // Call-stack shadow

    /// Track entry into a script function
    pub fn push_call_event(&mut self, function: FunctionId, args: &[TtdVar], is_in_finally: bool) {
        let just_my_code = (self.just_my_code)(function);
        tracing::trace!(function = function.0, argc = args.len(), "Call");
        self.call_stack
            .push_call(function, args.len(), just_my_code, is_in_finally);
    }

    /// Track a normal return. `result` is kept on the frame for the
    /// last-return location.
    pub fn pop_call_event(&mut self, function: FunctionId, result: Option<TtdVar>) {
        tracing::trace!(function = function.0, ?result, "Return");
        self.call_stack.pop_call(function, result);
    }

    /// Track an exception leaving a function
    pub fn pop_call_event_exception(&mut self, function: FunctionId) {
        tracing::trace!(function = function.0, "Exception exit");
        self.call_stack.pop_call_exception(function);
    }

    /// Enter a call and pop it with the exception path unless completed
    pub fn call_frame(
        &mut self,
        function: FunctionId,
        args: &[TtdVar],
        is_in_finally: bool,
    ) -> CallFrameGuard<'_> {
        CallFrameGuard::new(self, function, args, is_in_finally)
    }

    pub fn update_current_statement_info<R: ScriptRuntime + ?Sized>(
        &mut self,
        bytecode_offset: u32,
        runtime: &R,
    ) {
        self.call_stack
            .update_current_statement_info(bytecode_offset, runtime);
    }

    pub fn update_loop_count_info(&mut self) {
        self.call_stack.update_loop_count_info();
    }

    /// Clear the shadow stack for a new host-invoked top-level call
    pub fn reset_call_stack_for_top_level_call(
        &mut self,
        top_level_event_time: i64,
        host_callback_id: i64,
    ) {
        self.call_stack
            .reset_for_top_level(top_level_event_time, host_callback_id);
    }

    pub fn call_stack(&self) -> &CallStackShadow {
        &self.call_stack
    }

    ////////
    // Callback correlation

    /// Find the callback operation for `callback_id`, searching back from the
    /// current position. `want_register` selects the create operation,
    /// otherwise the cancel. Returns the operation's event time and data.
    pub fn event_for_host_callback_id(
        &self,
        want_register: bool,
        callback_id: i64,
    ) -> Option<(i64, &CallbackOperationData)> {
        if callback_id == -1 {
            return None;
        }
        let limit = if self.modes.is_replay_mode() {
            self.event_time_ctr
        } else {
            i64::MAX
        };
        self.events
            .iter()
            .rev()
            .filter(|entry| entry.event_time < limit)
            .find_map(|entry| match &entry.payload {
                EventPayload::CallbackOperation(data)
                    if data.callback_id == callback_id
                        && (if want_register {
                            data.is_create
                        } else {
                            data.is_cancel
                        }) =>
                {
                    Some((entry.event_time, data))
                }
                _ => None,
            })
    }

    ////////
    // Persistence

    /// Write the log to the configured location when recording.
    /// Returns the path written, if any.
    pub fn emit_log_if_needed(&self) -> TtdResult<Option<PathBuf>> {
        if !self.modes.is_record_mode() || !self.config.log.emit_on_exit {
            return Ok(None);
        }
        let Some(path) = self.config.log_path() else {
            tracing::warn!("No log directory available, skipping log emission");
            return Ok(None);
        };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut writer = BufWriter::new(File::create(&path)?);
        self.emit_log_to(&mut writer)?;
        writer.flush()?;
        tracing::info!(path = %path.display(), events = self.events.count(), "Emitted time travel log");
        Ok(Some(path))
    }

    /// Serialize the log to `writer`
    pub fn emit_log_to<W: Write>(&self, writer: W) -> TtdResult<()> {
        let mut flags = LogFlags::empty();
        if self.config.log.compress {
            flags |= LogFlags::COMPRESSED;
        }
        let header = LogHeader {
            flags,
            entry_count: self.events.count() as u64,
            last_event_time: self.last_event_time(),
            ..LogHeader::default()
        };
        let body = LogBody {
            property_records: self.property_records.clone(),
            top_level_scripts: self.top_level_scripts.clone(),
            snapshots: self.snapshots.values().cloned().collect(),
            entries: self.events.iter().cloned().collect(),
        };
        LogWriter::new(writer).write_log(&header, &body)?;
        Ok(())
    }

    /// Load a log file emitted by [`Self::emit_log_if_needed`]
    pub fn parse_log_into(&mut self, path: &Path) -> TtdResult<()> {
        let reader = BufReader::new(File::open(path)?);
        self.parse_log_from(reader)?;
        tracing::info!(path = %path.display(), "Loaded time travel log");
        Ok(())
    }

    /// Replace the log contents with a serialized log from `reader`
    pub fn parse_log_from<R: Read>(&mut self, reader: R) -> TtdResult<()> {
        let (header, body) = LogReader::new(reader).read_log()?;

        // Reject the whole body before touching the current contents
        let mut previous = i64::MIN;
        for entry in &body.entries {
            if !entry.is_well_formed() || entry.event_time <= previous {
                return Err(TtdError::LogCorruption {
                    expected: entry.kind,
                    found: entry.kind,
                    event_time: entry.event_time,
                });
            }
            previous = entry.event_time;
        }

        self.events.unload_event_list();
        self.unload_retained_data();
        for entry in body.entries {
            self.events.get_next_available_entry(entry);
        }

        for record in body.property_records {
            self.add_property_record(record);
        }
        self.top_level_scripts = body.top_level_scripts;
        self.snapshots = body
            .snapshots
            .into_iter()
            .map(|snap| (snap.event_time, snap))
            .collect();

        self.event_time_ctr = header.last_event_time + 1;
        self.replay_cursor = self.events.iter_at_first();
        Ok(())
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("mode", &self.modes.current())
            .field("event_time_ctr", &self.event_time_ctr)
            .field("events", &self.events)
            .field("snapshots", &self.snapshots.keys().collect::<Vec<_>>())
            .field("root_nesting_depth", &self.root_nesting_depth)
            .field("call_depth", &self.call_stack.depth())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockHost, recording_log};

    #[test]
    fn test_record_assigns_increasing_times() {
        let mut log = recording_log();
        log.record_date_time_event(1.5);
        log.record_external_entropy_random_event(1, 2);
        log.record_symbol_creation_event(PropertyId(4));

        let times: Vec<i64> = log.events().iter().map(|e| e.event_time).collect();
        assert_eq!(times, vec![0, 1, 2]);
        assert_eq!(log.last_event_time(), 2);
    }

    #[test]
    fn test_replay_kind_mismatch_is_corruption() {
        let mut log = recording_log();
        log.record_date_time_event(1.5);
        log.init_for_ttd_replay();

        let err = log.replay_external_entropy_random_event().unwrap_err();
        assert!(matches!(
            err,
            TtdError::LogCorruption {
                expected: EventKind::RandomSeed,
                found: EventKind::DateTime,
                event_time: 0,
            }
        ));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_replay_past_end_aborts() {
        let mut log = recording_log();
        log.record_date_string_event("Tue");
        log.init_for_ttd_replay();

        assert_eq!(log.replay_date_string_event().unwrap(), "Tue");
        let err = log.replay_date_string_event().unwrap_err();
        assert_eq!(err.abort_reason(), Some(AbortReason::EndOfLog));
    }

    #[test]
    fn test_replay_values() {
        let mut log = recording_log();
        log.record_property_enum_event(true, PropertyId(3), 7, Some("x"));
        log.record_telemetry_log_event("hello", true);
        log.record_telemetry_log_event("quiet", false);
        log.record_top_level_code_action(11);
        log.init_for_ttd_replay();

        let step = log.replay_property_enum_event().unwrap();
        assert!(step.return_code);
        assert_eq!(step.name.as_deref(), Some("x"));
        assert_eq!(log.replay_telemetry_log_event().unwrap().as_deref(), Some("hello"));
        assert_eq!(log.replay_telemetry_log_event().unwrap(), None);
        assert_eq!(log.replay_top_level_code_action().unwrap(), 11);
        assert_eq!(log.current_event_time(), 4);
    }

    #[test]
    fn test_external_call_two_phase() {
        let mut log = recording_log();
        let handle = log.record_external_call_event(FunctionId(9), 1, &[TtdVar(1), TtdVar(2)]);
        assert_eq!(log.events()[handle].status, ActionStatus::Pending);
        {
            // The host function calls back into the runtime while it runs
            let mut action = log.record_js_rt_create_number(3.0);
            action.set_result(TtdVar(40));
        }
        log.record_external_call_event_complete(handle, ExternalCallOutcome::Returned(TtdVar(5)));
        log.record_date_time_event(8.0);

        let entry = &log.events()[handle];
        assert_eq!(entry.status, ActionStatus::Complete);
        assert_eq!(entry.last_nested_event_time(), 1);

        log.init_for_ttd_replay();
        let mut host = MockHost::new();
        let outcome = log.replay_external_call_event(&mut host, FunctionId(9)).unwrap();
        assert_eq!(outcome, ExternalCallOutcome::Returned(TtdVar(5)));
        assert_eq!(host.executed_kinds(), vec![EventKind::CreateNumber]);
        assert_eq!(log.replay_date_time_event().unwrap(), 8.0);
    }

    #[test]
    fn test_external_call_threw() {
        let mut log = recording_log();
        let handle = log.record_external_call_event(FunctionId(9), 0, &[]);
        log.record_external_call_event_complete(handle, ExternalCallOutcome::Threw);
        log.init_for_ttd_replay();

        let mut host = MockHost::new();
        let outcome = log.replay_external_call_event(&mut host, FunctionId(9)).unwrap();
        assert_eq!(outcome, ExternalCallOutcome::Threw);
    }

    #[test]
    fn test_enqueue_task_two_phase() {
        let mut log = recording_log();
        let handle = log.record_enqueue_task_event(TtdVar(77));
        log.record_enqueue_task_event_complete(handle);
        log.init_for_ttd_replay();

        let mut host = MockHost::new();
        assert_eq!(log.replay_enqueue_task_event(&mut host).unwrap(), TtdVar(77));
    }

    #[test]
    fn test_pause_time_travel_excludes_recording() {
        let mut log = recording_log();
        assert!(log.should_perform_record_action());
        {
            let paused = log.pause_time_travel();
            assert!(!paused.should_perform_record_action());
        }
        assert!(log.should_perform_record_action());

        log.pause_time_travel_before_runtime_operation();
        assert!(!log.should_perform_record_action());
        log.restart_time_travel_after_runtime_operation();
        assert!(log.should_perform_record_action());
    }

    #[test]
    fn test_property_records_dedup() {
        let mut log = recording_log();
        let record = PropertyRecord {
            pid: PropertyId(12),
            name: "length".into(),
            is_symbol: false,
            is_numeric: false,
        };
        log.add_property_record(record.clone());
        log.add_property_record(record);
        assert_eq!(log.property_records().len(), 1);
        assert!(log.is_property_record_ref(PropertyId(12)));
        assert!(!log.is_property_record_ref(PropertyId(13)));
    }

    #[test]
    fn test_top_level_scripts_indexed() {
        let mut log = recording_log();
        assert_eq!(log.add_script_load(1, 0, 100, b"let a = 1;", 0), 0);
        assert_eq!(log.add_new_function(2, 0, "return 1"), 1);
        assert_eq!(log.add_eval_function(3, 0, "a + 1", 0, false, true, false), 2);
        assert!(matches!(
            log.top_level_scripts()[2].kind,
            ScriptKind::Eval { is_indirect: true, .. }
        ));

        log.unload_retained_data();
        assert!(log.top_level_scripts().is_empty());
    }

    #[test]
    fn test_stop_time_travel_detaches() {
        let mut log = recording_log();
        log.start_time_travel_on_script(ContextId(1));
        assert_eq!(log.context(), Some(ContextId(1)));
        log.stop_time_travel_on_script(ContextId(1));
        assert!(log.context().is_none());
        assert!(log.modes().current().contains(TtdMode::DETACHED));
        assert!(!log.should_perform_record_action());
    }

    #[test]
    fn test_emit_and_parse_roundtrip() {
        let mut log = recording_log();
        log.add_property_record(PropertyRecord {
            pid: PropertyId(1),
            name: "x".into(),
            is_symbol: false,
            is_numeric: false,
        });
        log.record_date_time_event(10.0);
        log.record_date_string_event("now");

        let mut buffer = Vec::new();
        log.emit_log_to(&mut buffer).unwrap();

        let mut loaded = EventLog::new(TtdConfig::default());
        loaded.parse_log_from(buffer.as_slice()).unwrap();
        assert_eq!(loaded.events().count(), 2);
        assert_eq!(loaded.property_records().len(), 1);
        assert_eq!(loaded.last_event_time(), 1);

        loaded.init_for_ttd_replay();
        assert_eq!(loaded.replay_date_time_event().unwrap(), 10.0);
        assert_eq!(loaded.replay_date_string_event().unwrap(), "now");
    }

    #[test]
    fn test_rejected_log_leaves_contents_unchanged() {
        let mut log = recording_log();
        log.add_property_record(PropertyRecord {
            pid: PropertyId(1),
            name: "x".into(),
            is_symbol: false,
            is_numeric: false,
        });
        log.record_date_time_event(10.0);
        let mut buffer = Vec::new();
        log.emit_log_to(&mut buffer).unwrap();

        let mut loaded = EventLog::new(TtdConfig::default());
        loaded.parse_log_from(buffer.as_slice()).unwrap();

        // Second entry does not advance the clock
        let date = |time| {
            EventLogEntry::new(EventKind::DateTime, time, EventPayload::DateTime { time: 1.0 })
        };
        let body = LogBody {
            entries: vec![date(0), date(1), date(1)],
            ..LogBody::default()
        };
        let header = LogHeader {
            entry_count: 3,
            last_event_time: 1,
            ..LogHeader::default()
        };
        let mut bad = Vec::new();
        LogWriter::new(&mut bad).write_log(&header, &body).unwrap();

        let err = loaded.parse_log_from(bad.as_slice()).unwrap_err();
        assert!(matches!(err, TtdError::LogCorruption { event_time: 1, .. }));
        assert_eq!(loaded.events().count(), 1);
        assert_eq!(loaded.property_records().len(), 1);
        assert_eq!(loaded.last_event_time(), 0);

        loaded.init_for_ttd_replay();
        assert_eq!(loaded.replay_date_time_event().unwrap(), 10.0);
    }

    #[test]
    fn test_emit_log_if_needed_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TtdConfig::default();
        config.log.directory = Some(dir.path().to_path_buf());

        let mut log = EventLog::new(config);
        log.init_for_ttd_record();
        log.record_external_entropy_random_event(4, 5);

        let path = log.emit_log_if_needed().unwrap().unwrap();
        assert!(path.exists());

        let mut loaded = EventLog::new(TtdConfig::default());
        loaded.parse_log_into(&path).unwrap();
        loaded.init_for_ttd_replay();
        assert_eq!(loaded.replay_external_entropy_random_event().unwrap(), (4, 5));
    }

    #[test]
    fn test_emit_skipped_outside_record_mode() {
        let log = EventLog::new(TtdConfig::default());
        assert!(log.emit_log_if_needed().unwrap().is_none());
    }
}
