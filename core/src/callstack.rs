//! Shadow call stack
//!
//! Mirrors the interpreter's real call stack with one [`SingleCallCounter`]
//! per active call. Positions reported to the debugger are read from here
//! rather than by walking native frames. Every host-invoked top-level call
//! starts a fresh stack tagged with the event time of the root event.

use crate::host::{FunctionId, ScriptRuntime, SourcePosition, TtdVar};

/// Statement position within a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementInfo {
    /// Statement index, -1 when no statement has executed yet
    pub index: i32,
    /// Loop time of the call when the statement started
    pub loop_time: u64,
    pub bytecode_min: u32,
    pub bytecode_max: u32,
    pub position: SourcePosition,
}

impl StatementInfo {
    /// No statement executed
    pub const NONE: Self = Self {
        index: -1,
        loop_time: 0,
        bytecode_min: u32::MAX,
        bytecode_max: u32::MAX,
        position: SourcePosition {
            script_id: 0,
            line: 0,
            column: 0,
        },
    };

    pub fn is_defined(&self) -> bool {
        self.index != -1
    }

    fn contains(&self, bytecode_offset: u32) -> bool {
        self.bytecode_min <= bytecode_offset && bytecode_offset <= self.bytecode_max
    }
}

impl Default for StatementInfo {
    fn default() -> Self {
        Self::NONE
    }
}

/// Shadow frame for one active call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SingleCallCounter {
    pub function: FunctionId,
    /// Number of arguments the call was entered with
    pub argc: u32,
    /// Function time counter value when the call was entered
    pub function_time: u64,
    /// Loop iterations executed in this call
    pub loop_time: u64,
    /// Whether the debugger treats this function as user code
    pub just_my_code: bool,
    pub current: StatementInfo,
    pub last: StatementInfo,
    /// Value of a normal return, set when the frame is popped
    pub return_value: Option<TtdVar>,
}

/// Most recent exit from a call, kept for step-back-into and
/// step-to-last-statement requests.
#[cfg(feature = "debugging")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LastReturnLocation {
    #[default]
    Undefined,
    /// Frame that returned normally
    Return(SingleCallCounter),
    /// Innermost frame an exception left
    Exception(SingleCallCounter),
}

#[cfg(feature = "debugging")]
impl LastReturnLocation {
    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    pub fn is_return_location(&self) -> bool {
        matches!(self, Self::Return(_))
    }

    pub fn is_exception_location(&self) -> bool {
        matches!(self, Self::Exception(_))
    }

    pub fn location(&self) -> Option<&SingleCallCounter> {
        match self {
            Self::Undefined => None,
            Self::Return(frame) | Self::Exception(frame) => Some(frame),
        }
    }

    pub fn clear(&mut self) {
        *self = Self::Undefined;
    }

    pub fn clear_return_only(&mut self) {
        if self.is_return_location() {
            self.clear();
        }
    }

    pub fn clear_exception_only(&mut self) {
        if self.is_exception_location() {
            self.clear();
        }
    }
}

/// Shadow of the interpreter call stack for the current top-level call
#[derive(Debug, Clone)]
pub struct CallStackShadow {
    frames: Vec<SingleCallCounter>,
    /// Counter bumped on every call entry and exit within a top-level call
    running_function_time: u64,
    /// Event time of the root event that started the current top-level call
    top_level_event_time: i64,
    /// Host callback id of the current top-level call, -1 if invoked directly
    host_callback_id: i64,
    #[cfg(feature = "debugging")]
    last_return: LastReturnLocation,
    #[cfg(feature = "debugging")]
    last_return_jmc: LastReturnLocation,
}

impl CallStackShadow {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            running_function_time: 0,
            top_level_event_time: -1,
            host_callback_id: -1,
            #[cfg(feature = "debugging")]
            last_return: LastReturnLocation::Undefined,
            #[cfg(feature = "debugging")]
            last_return_jmc: LastReturnLocation::Undefined,
        }
    }

    /// Enter a call
    pub fn push_call(
        &mut self,
        function: FunctionId,
        argc: usize,
        just_my_code: bool,
        is_in_finally: bool,
    ) {
        #[cfg(feature = "debugging")]
        {
            self.last_return.clear_return_only();
            self.last_return_jmc.clear_return_only();
            // Calls made from a finally block while unwinding keep the exception location.
            if !is_in_finally {
                self.clear_exception_frames();
            }
        }
        #[cfg(not(feature = "debugging"))]
        let _ = is_in_finally;

        self.running_function_time += 1;
        self.frames.push(SingleCallCounter {
            function,
            argc: argc as u32,
            function_time: self.running_function_time,
            loop_time: 0,
            just_my_code,
            current: StatementInfo::NONE,
            last: StatementInfo::NONE,
            return_value: None,
        });
    }

    /// Leave the top call normally and return its frame with `result`
    /// attached.
    ///
    /// # Panics
    ///
    /// Panics if the stack is empty or the top frame belongs to another function.
    pub fn pop_call(&mut self, function: FunctionId, result: Option<TtdVar>) -> SingleCallCounter {
        let mut frame = self.pop_matching(function);
        frame.return_value = result;

        #[cfg(feature = "debugging")]
        {
            self.last_return = LastReturnLocation::Return(frame);
            if frame.just_my_code {
                self.last_return_jmc = LastReturnLocation::Return(frame);
            }
        }
        frame
    }

    /// Leave the top call because an exception propagated out of it
    pub fn pop_call_exception(&mut self, function: FunctionId) -> SingleCallCounter {
        let frame = self.pop_matching(function);

        #[cfg(feature = "debugging")]
        {
            // Keep the innermost frame the exception left.
            if !self.last_return.is_exception_location() {
                self.last_return = LastReturnLocation::Exception(frame);
            }
            if frame.just_my_code && !self.last_return_jmc.is_exception_location() {
                self.last_return_jmc = LastReturnLocation::Exception(frame);
            }
        }
        frame
    }

    fn pop_matching(&mut self, function: FunctionId) -> SingleCallCounter {
        let frame = self.frames.pop().expect("call stack pop without a matching push");
        assert_eq!(
            frame.function, function,
            "call stack pop does not match the active function"
        );
        self.running_function_time += 1;
        frame
    }

    /// Track the statement containing `bytecode_offset` in the top frame
    pub fn update_current_statement_info<R: ScriptRuntime + ?Sized>(
        &mut self,
        bytecode_offset: u32,
        runtime: &R,
    ) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if frame.current.is_defined() && frame.current.contains(bytecode_offset) {
            return;
        }
        let Some(span) = runtime.statement_at(frame.function, bytecode_offset) else {
            return;
        };
        if span.index == frame.current.index && frame.current.loop_time == frame.loop_time {
            return;
        }

        frame.last = frame.current;
        frame.current = StatementInfo {
            index: span.index,
            loop_time: frame.loop_time,
            bytecode_min: span.bytecode_min,
            bytecode_max: span.bytecode_max,
            position: span.position,
        };

        #[cfg(feature = "debugging")]
        {
            self.last_return.clear();
            self.last_return_jmc.clear();
        }
    }

    /// Count one more loop iteration in the top frame
    pub fn update_loop_count_info(&mut self) {
        if let Some(frame) = self.frames.last_mut() {
            frame.loop_time += 1;
            // The statement re-executes on the next iteration.
            frame.current.bytecode_min = u32::MAX;
            frame.current.bytecode_max = u32::MAX;
        }
    }

    /// Start a fresh stack for a new top-level call
    pub fn reset_for_top_level(&mut self, top_level_event_time: i64, host_callback_id: i64) {
        self.frames.clear();
        self.running_function_time = 0;
        self.top_level_event_time = top_level_event_time;
        self.host_callback_id = host_callback_id;
        #[cfg(feature = "debugging")]
        {
            self.last_return.clear();
            self.last_return_jmc.clear();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn top(&self) -> Option<&SingleCallCounter> {
        self.frames.last()
    }

    pub fn frames(&self) -> &[SingleCallCounter] {
        &self.frames
    }

    /// Nearest caller of the top frame, optionally skipping non-user frames
    pub fn top_caller(&self, just_my_code: bool) -> Option<&SingleCallCounter> {
        let below_top = self.frames.len().checked_sub(1)?;
        self.frames[..below_top]
            .iter()
            .rev()
            .find(|frame| !just_my_code || frame.just_my_code)
    }

    pub fn running_function_time(&self) -> u64 {
        self.running_function_time
    }

    pub fn top_level_event_time(&self) -> i64 {
        self.top_level_event_time
    }

    pub fn host_callback_id(&self) -> i64 {
        self.host_callback_id
    }

    #[cfg(feature = "debugging")]
    pub fn last_return_location(&self, just_my_code: bool) -> &LastReturnLocation {
        if just_my_code {
            &self.last_return_jmc
        } else {
            &self.last_return
        }
    }

    /// Forget the exception exit location
    #[cfg(feature = "debugging")]
    pub fn clear_exception_frames(&mut self) {
        self.last_return.clear_exception_only();
        self.last_return_jmc.clear_exception_only();
    }

    /// Forget the normal return location
    #[cfg(feature = "debugging")]
    pub fn clear_return_frames(&mut self) {
        self.last_return.clear_return_only();
        self.last_return_jmc.clear_return_only();
    }
}

impl Default for CallStackShadow {
    fn default() -> Self {
        Self::new()
    }
}
