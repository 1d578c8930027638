//! Host API (JsRT) action recording
//!
//! Each `record_js_rt_*` appends a pending action entry with its inputs and
//! returns a guard that completes the entry when the action exits. Replay
//! does not go through these methods: the replay driver hands each action
//! entry to [`crate::host::ScriptRuntime::execute_action`].

use smallvec::smallvec;

use crate::error::{HostError, TtdResult};
use crate::event::{
    ArgVec, CallFunctionData, CallbackOperationData, CodeParseData, EventKind, EventPayload,
};
use crate::host::{FunctionId, PropertyId, SnapshotSubsystem, TtdVar};

use super::{ActionResultRecorder, CallFunctionRecorder, EventLog};

/// Error constructor a script asked the host for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsErrorKind {
    Error,
    Range,
    Reference,
    Syntax,
    Type,
    Uri,
}

impl JsErrorKind {
    fn event_kind(self) -> EventKind {
        match self {
            Self::Error => EventKind::CreateError,
            Self::Range => EventKind::CreateRangeError,
            Self::Reference => EventKind::CreateReferenceError,
            Self::Syntax => EventKind::CreateSyntaxError,
            Self::Type => EventKind::CreateTypeError,
            Self::Uri => EventKind::CreateUriError,
        }
    }
}

fn vars(vars: ArgVec) -> EventPayload {
    EventPayload::Vars { vars, result: None }
}

fn vars_with_property(vars: ArgVec, pid: PropertyId, flag: bool) -> EventPayload {
    EventPayload::VarsWithProperty {
        vars,
        pid,
        flag,
        result: None,
    }
}

fn integral(vars: ArgVec, value: i64, flag: bool) -> EventPayload {
    EventPayload::Integral {
        vars,
        value,
        flag,
        result: None,
    }
}

fn buffer(vars: ArgVec, index: u32, bytes: Vec<u8>) -> EventPayload {
    EventPayload::Buffer {
        vars,
        index,
        bytes,
        result: None,
    }
}

impl EventLog {
    fn record_action(&mut self, kind: EventKind, payload: EventPayload) -> ActionResultRecorder<'_> {
        let handle = self.record_pending_event(kind, payload);
        ActionResultRecorder::new(self, handle)
    }

    ////////
    // Value creation

    pub fn record_js_rt_create_number(&mut self, value: f64) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::CreateNumber,
            EventPayload::Number {
                value,
                result: None,
            },
        )
    }

    pub fn record_js_rt_create_boolean(&mut self, value: bool) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::CreateBoolean,
            integral(ArgVec::new(), value as i64, value),
        )
    }

    pub fn record_js_rt_create_string(&mut self, value: &str) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::CreateString,
            EventPayload::Text {
                value: value.to_string(),
                result: None,
            },
        )
    }

    pub fn record_js_rt_create_symbol(&mut self, description: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::CreateSymbol, vars(smallvec![description]))
    }

    pub fn record_js_rt_create_error(
        &mut self,
        kind: JsErrorKind,
        message: TtdVar,
    ) -> ActionResultRecorder<'_> {
        self.record_action(kind.event_kind(), vars(smallvec![message]))
    }

    ////////
    // Conversions

    pub fn record_js_rt_var_to_number_conversion(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::VarToNumber, vars(smallvec![var]))
    }

    pub fn record_js_rt_var_to_boolean_conversion(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::VarToBoolean, vars(smallvec![var]))
    }

    pub fn record_js_rt_var_to_string_conversion(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::VarToString, vars(smallvec![var]))
    }

    pub fn record_js_rt_var_to_object_conversion(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::VarToObject, vars(smallvec![var]))
    }

    ////////
    // Lifetime management

    pub fn record_js_rt_add_root_ref(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::AddRootRef, vars(smallvec![var]))
    }

    pub fn record_js_rt_remove_root_ref(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::RemoveRootRef, vars(smallvec![var]))
    }

    /// Record that the host returned to its event loop, and take a snapshot
    /// if one is due while no script code is running.
    pub fn record_js_rt_event_loop_yield_point<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
    ) -> TtdResult<()> {
        self.record_event(EventKind::EventLoopYieldPoint, EventPayload::YieldPoint);
        if self.modes.is_record_mode() && self.is_time_for_snapshot() {
            self.do_snapshot_extract(snapshots)?;
            self.prune_log_length();
        }
        Ok(())
    }

    ////////
    // Allocation

    pub fn record_js_rt_allocate_object(&mut self) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::AllocateObject, vars(ArgVec::new()))
    }

    pub fn record_js_rt_allocate_external_object(&mut self) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::AllocateExternalObject, vars(ArgVec::new()))
    }

    pub fn record_js_rt_allocate_array(&mut self, length: u32) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::AllocateArray,
            integral(ArgVec::new(), length as i64, false),
        )
    }

    pub fn record_js_rt_allocate_array_buffer(&mut self, size: u32) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::AllocateArrayBuffer,
            buffer(ArgVec::new(), size, Vec::new()),
        )
    }

    /// The initial buffer contents are copied into the log
    pub fn record_js_rt_allocate_external_array_buffer(
        &mut self,
        contents: &[u8],
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::AllocateExternalArrayBuffer,
            buffer(ArgVec::new(), contents.len() as u32, contents.to_vec()),
        )
    }

    pub fn record_js_rt_allocate_function(&mut self, name: Option<TtdVar>) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::AllocateFunction, vars(name.into_iter().collect()))
    }

    ////////
    // Exceptions and process exit

    pub fn record_js_rt_host_exit_process(&mut self, exit_code: i32) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::HostExitProcess,
            integral(ArgVec::new(), exit_code as i64, false),
        )
    }

    pub fn record_js_rt_get_and_clear_exception(&mut self) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::GetAndClearException, vars(ArgVec::new()))
    }

    pub fn record_js_rt_set_exception(
        &mut self,
        var: TtdVar,
        propagate_to_debugger: bool,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::SetException,
            integral(smallvec![var], 0, propagate_to_debugger),
        )
    }

    ////////
    // Object getters

    pub fn record_js_rt_get_property(&mut self, pid: PropertyId, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::GetProperty,
            vars_with_property(smallvec![var], pid, false),
        )
    }

    pub fn record_js_rt_get_index(&mut self, index: TtdVar, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::GetIndex, vars(smallvec![var, index]))
    }

    pub fn record_js_rt_get_own_property_info(
        &mut self,
        pid: PropertyId,
        var: TtdVar,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::GetOwnPropertyInfo,
            vars_with_property(smallvec![var], pid, false),
        )
    }

    pub fn record_js_rt_get_own_property_names_info(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::GetOwnPropertyNamesInfo, vars(smallvec![var]))
    }

    pub fn record_js_rt_get_own_property_symbols_info(&mut self, var: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::GetOwnPropertySymbolsInfo, vars(smallvec![var]))
    }

    ////////
    // Object setters

    pub fn record_js_rt_define_property(
        &mut self,
        var: TtdVar,
        pid: PropertyId,
        descriptor: TtdVar,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::DefineProperty,
            vars_with_property(smallvec![var, descriptor], pid, false),
        )
    }

    pub fn record_js_rt_delete_property(
        &mut self,
        var: TtdVar,
        pid: PropertyId,
        use_strict_rules: bool,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::DeleteProperty,
            vars_with_property(smallvec![var], pid, use_strict_rules),
        )
    }

    pub fn record_js_rt_set_prototype(&mut self, var: TtdVar, proto: TtdVar) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::SetPrototype, vars(smallvec![var, proto]))
    }

    pub fn record_js_rt_set_property(
        &mut self,
        var: TtdVar,
        pid: PropertyId,
        value: TtdVar,
        use_strict_rules: bool,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::SetProperty,
            vars_with_property(smallvec![var, value], pid, use_strict_rules),
        )
    }

    pub fn record_js_rt_set_index(
        &mut self,
        var: TtdVar,
        index: TtdVar,
        value: TtdVar,
    ) -> ActionResultRecorder<'_> {
        self.record_action(EventKind::SetIndex, vars(smallvec![var, index, value]))
    }

    /// Typed array info is recorded complete in one step
    pub fn record_js_rt_get_typed_array_info(&mut self, var: TtdVar, result: TtdVar) {
        self.record_event(
            EventKind::GetTypedArrayInfo,
            EventPayload::Vars {
                vars: smallvec![var],
                result: Some(result),
            },
        );
    }

    ////////
    // Raw buffers

    pub fn record_js_rt_raw_buffer_copy_sync(
        &mut self,
        dst: TtdVar,
        dst_index: u32,
        src: TtdVar,
        src_index: u32,
        length: u32,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::RawBufferCopySync,
            EventPayload::RawBufferCopy {
                dst,
                dst_index,
                src,
                src_index,
                length,
            },
        )
    }

    /// `bytes` are the new contents of `dst` starting at `index`
    pub fn record_js_rt_raw_buffer_modify_sync(
        &mut self,
        dst: TtdVar,
        index: u32,
        bytes: &[u8],
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::RawBufferModifySync,
            buffer(smallvec![dst], index, bytes.to_vec()),
        )
    }

    /// Register a buffer the host will modify outside script execution
    pub fn record_js_rt_raw_buffer_async_modification_register(
        &mut self,
        dst: TtdVar,
        index: u32,
    ) -> ActionResultRecorder<'_> {
        self.pending_async_mods.push((dst, index));
        self.record_action(
            EventKind::RawBufferAsyncModificationRegister,
            integral(smallvec![dst], index as i64, false),
        )
    }

    /// Record the bytes written by a registered async modification
    pub fn record_js_rt_raw_buffer_async_modify_complete(
        &mut self,
        dst: TtdVar,
        bytes: &[u8],
    ) -> TtdResult<ActionResultRecorder<'_>> {
        let Some(pos) = self.pending_async_mods.iter().position(|(buf, _)| *buf == dst) else {
            return Err(HostError::new(
                "raw_buffer_async_modify_complete",
                format!("buffer {:?} has no registered modification", dst),
            )
            .into());
        };
        let (_, index) = self.pending_async_mods.remove(pos);
        Ok(self.record_action(
            EventKind::RawBufferAsyncModifyComplete,
            buffer(smallvec![dst], index, bytes.to_vec()),
        ))
    }

    ////////
    // Calls and callbacks

    pub fn record_js_rt_construct_call(
        &mut self,
        function: TtdVar,
        args: &[TtdVar],
    ) -> ActionResultRecorder<'_> {
        let root_depth = self.root_nesting_depth;
        let handle = self.record_pending_event(
            EventKind::ConstructCall,
            EventPayload::CallFunction(CallFunctionData {
                root_depth,
                host_callback_id: -1,
                function,
                args: args.iter().copied().collect(),
                result: None,
                threw: false,
                elapsed_secs: 0.0,
                last_nested_event_time: -1,
            }),
        );
        ActionResultRecorder::nesting(self, handle)
    }

    /// Record a callback create or cancel.
    ///
    /// A cancel is linked to the most recent create with the same callback id.
    pub fn record_js_rt_callback_operation(
        &mut self,
        is_create: bool,
        is_cancel: bool,
        is_repeating: bool,
        function: Option<FunctionId>,
        callback_id: i64,
    ) {
        let register_event_time = if is_create {
            self.current_event_time()
        } else {
            self.event_for_host_callback_id(true, callback_id)
                .map_or(-1, |(time, _)| time)
        };
        self.record_event(
            EventKind::CallbackOperation,
            EventPayload::CallbackOperation(CallbackOperationData {
                is_create,
                is_cancel,
                is_repeating,
                function,
                callback_id,
                register_event_time,
            }),
        );
    }

    /// Record a source parse. The caller sets the parsed function as the result.
    pub fn record_js_rt_code_parse(
        &mut self,
        load_flag: u32,
        is_utf8: bool,
        source: &[u8],
        source_context_id: u64,
        source_uri: &str,
    ) -> ActionResultRecorder<'_> {
        self.record_action(
            EventKind::CodeParse,
            EventPayload::CodeParse(CodeParseData {
                load_flag,
                is_utf8,
                source: source.to_vec(),
                source_context_id,
                source_uri: source_uri.to_string(),
                result: None,
            }),
        )
    }

    /// Record a host call into an existing script function.
    ///
    /// A top-level call (`root_depth == 0`) first takes a snapshot if one is
    /// due and then starts a fresh shadow call stack.
    pub fn record_js_rt_call_function<S: SnapshotSubsystem + ?Sized>(
        &mut self,
        snapshots: &mut S,
        root_depth: u32,
        host_callback_id: i64,
        function: TtdVar,
        args: &[TtdVar],
    ) -> TtdResult<CallFunctionRecorder<'_>> {
        if root_depth == 0 {
            self.take_snapshot_if_needed(snapshots)?;
        }

        let handle = self.record_pending_event(
            EventKind::CallExistingFunction,
            EventPayload::CallFunction(CallFunctionData {
                root_depth,
                host_callback_id,
                function,
                args: args.iter().copied().collect(),
                result: None,
                threw: false,
                elapsed_secs: 0.0,
                last_nested_event_time: -1,
            }),
        );

        if root_depth == 0 {
            let event_time = self.events[handle].event_time;
            self.reset_call_stack_for_top_level_call(event_time, host_callback_id);
        }
        Ok(CallFunctionRecorder::new(self, handle, root_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ActionStatus;
    use crate::test_utils::{MockHost, recording_log};

    #[test]
    fn test_error_kinds_map_to_events() {
        let mut log = recording_log();
        for kind in [JsErrorKind::Error, JsErrorKind::Range, JsErrorKind::Uri] {
            let mut action = log.record_js_rt_create_error(kind, TtdVar(1));
            action.set_result(TtdVar(2));
        }
        let kinds: Vec<EventKind> = log.events().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::CreateError,
                EventKind::CreateRangeError,
                EventKind::CreateUriError
            ]
        );
    }

    #[test]
    fn test_all_actions_are_well_formed() {
        let mut log = recording_log();
        log.record_js_rt_create_boolean(true).normal_completion();
        log.record_js_rt_create_symbol(TtdVar(1)).normal_completion();
        log.record_js_rt_var_to_string_conversion(TtdVar(1)).normal_completion();
        log.record_js_rt_allocate_array(3).normal_completion();
        log.record_js_rt_allocate_external_array_buffer(&[1, 2]).normal_completion();
        log.record_js_rt_allocate_function(Some(TtdVar(4))).normal_completion();
        log.record_js_rt_set_exception(TtdVar(1), true).normal_completion();
        log.record_js_rt_get_property(PropertyId(2), TtdVar(1)).normal_completion();
        log.record_js_rt_define_property(TtdVar(1), PropertyId(2), TtdVar(3)).normal_completion();
        log.record_js_rt_delete_property(TtdVar(1), PropertyId(2), true).normal_completion();
        log.record_js_rt_set_index(TtdVar(1), TtdVar(2), TtdVar(3)).normal_completion();
        log.record_js_rt_raw_buffer_copy_sync(TtdVar(1), 0, TtdVar(2), 4, 8).normal_completion();
        log.record_js_rt_construct_call(TtdVar(5), &[TtdVar(6)]).normal_completion();
        log.record_js_rt_get_typed_array_info(TtdVar(1), TtdVar(2));
        log.record_js_rt_code_parse(0, true, b"1+1", 3, "a.js").normal_completion();

        assert_eq!(log.events().count(), 15);
        assert!(log.events().iter().all(|e| e.is_well_formed()));
        assert!(log.events().iter().all(|e| e.kind.is_action()));
        assert!(log.events().iter().all(|e| e.status == ActionStatus::Complete));
    }

    #[test]
    fn test_async_buffer_modification() {
        let mut log = recording_log();
        log.record_js_rt_raw_buffer_async_modification_register(TtdVar(8), 16)
            .normal_completion();
        let handle = {
            let action = log
                .record_js_rt_raw_buffer_async_modify_complete(TtdVar(8), &[9, 9])
                .unwrap();
            let handle = action.handle();
            action.normal_completion();
            handle
        };
        match &log.events()[handle].payload {
            EventPayload::Buffer { index, bytes, .. } => {
                assert_eq!(*index, 16);
                assert_eq!(bytes, &vec![9, 9]);
            }
            other => panic!("unexpected payload {:?}", other),
        }

        assert!(
            log.record_js_rt_raw_buffer_async_modify_complete(TtdVar(8), &[1])
                .is_err()
        );
    }

    #[test]
    fn test_callback_cancel_links_to_create() {
        let mut log = recording_log();
        log.record_js_rt_callback_operation(true, false, false, Some(FunctionId(1)), 3);
        log.record_js_rt_callback_operation(true, false, true, Some(FunctionId(2)), 7);
        log.record_date_time_event(0.0);
        log.record_js_rt_callback_operation(false, true, false, None, 7);

        let cancel = log.events().iter().last().unwrap();
        match &cancel.payload {
            EventPayload::CallbackOperation(data) => assert_eq!(data.register_event_time, 1),
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_call_function_resets_stack_and_snapshots() {
        let mut log = recording_log();
        let mut host = MockHost::new();
        {
            let mut call = log
                .record_js_rt_call_function(&mut host, 0, 5, TtdVar(1), &[])
                .unwrap();
            assert_eq!(call.call_stack().top_level_event_time(), 1);
            assert_eq!(call.call_stack().host_callback_id(), 5);
            call.record_date_time_event(2.0);
            call.set_result(TtdVar(0));
        }

        // First top-level call always snapshots
        assert_eq!(log.snapshots().len(), 1);
        let call = log.events().iter().nth(1).unwrap();
        assert_eq!(call.kind, EventKind::CallExistingFunction);
        assert_eq!(call.status, ActionStatus::Complete);
        assert_eq!(call.last_nested_event_time(), 2);
    }

    #[test]
    fn test_call_function_without_result_is_abandoned() {
        let mut log = recording_log();
        let mut host = MockHost::new();
        let handle = log
            .record_js_rt_call_function(&mut host, 1, -1, TtdVar(1), &[])
            .unwrap()
            .handle();
        assert_eq!(log.events()[handle].status, ActionStatus::Abandoned);
        assert!(log.snapshots().is_empty());
    }
}
