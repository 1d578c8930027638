//! Record/replay mode stack
//!
//! The bottom of the stack is the global baseline mode set when a session
//! starts. Pushed modes refine it: base bits in a pushed mode can only narrow
//! the baseline (intersection) while modifier bits such as
//! `EXCLUDED_EXECUTION` are added on top (union). The effective mode is
//! recomputed on every push and pop so queries stay a single mask compare.

use smallvec::SmallVec;

bitflags::bitflags! {
    /// Time-travel mode flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TtdMode: u32 {
        /// Time travel requested but not started yet
        const PENDING = 0b0000_0001;
        /// Time travel switched off for this runtime
        const DETACHED = 0b0000_0010;
        /// Nondeterministic actions are appended to the log
        const RECORD_ENABLED = 0b0000_0100;
        /// Nondeterministic actions are served from the log
        const REPLAY_ENABLED = 0b0000_1000;
        /// A debugger is attached to the replay
        const DEBUGGING_ENABLED = 0b0001_0000;
        /// Code running on behalf of the host or debugger, not the program
        const EXCLUDED_EXECUTION = 0b0010_0000;

        /// Bits that describe the session rather than the current activity
        const BASE_MODES = Self::PENDING.bits()
            | Self::DETACHED.bits()
            | Self::RECORD_ENABLED.bits()
            | Self::REPLAY_ENABLED.bits()
            | Self::DEBUGGING_ENABLED.bits();

        const SHOULD_RECORD_ACTION_MASK = Self::RECORD_ENABLED.bits() | Self::EXCLUDED_EXECUTION.bits();
        const SHOULD_DEBUG_ACTION_MASK = Self::DEBUGGING_ENABLED.bits() | Self::EXCLUDED_EXECUTION.bits();
    }
}

/// Stack of pushed modes and the effective mode they compose to
#[derive(Debug, Clone)]
pub struct ModeStack {
    stack: SmallVec<[TtdMode; 8]>,
    current: TtdMode,
}

impl ModeStack {
    /// Create a stack with the given global baseline
    pub fn new(global: TtdMode) -> Self {
        let mut stack = SmallVec::new();
        stack.push(global);
        let mut modes = Self {
            stack,
            current: global,
        };
        modes.update_computed_mode();
        modes
    }

    /// Replace the global baseline
    pub fn set_global_mode(&mut self, mode: TtdMode) {
        assert!(
            (mode & !TtdMode::BASE_MODES).is_empty(),
            "global mode must only contain base bits: {:?}",
            mode
        );
        self.stack[0] = mode;
        self.update_computed_mode();
    }

    /// Push a mode on top of the stack
    pub fn push_mode(&mut self, mode: TtdMode) {
        self.stack.push(mode);
        self.update_computed_mode();
    }

    /// Pop the top mode, which must equal `mode`
    pub fn pop_mode(&mut self, mode: TtdMode) {
        assert!(self.stack.len() > 1, "cannot pop the global mode");
        let top = self.stack[self.stack.len() - 1];
        assert_eq!(top, mode, "mode stack pop does not match push");
        self.stack.pop();
        self.update_computed_mode();
    }

    /// Number of entries including the global baseline
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The global baseline
    pub fn global_mode(&self) -> TtdMode {
        self.stack[0]
    }

    /// The effective mode
    #[inline]
    pub fn current(&self) -> TtdMode {
        self.current
    }

    fn update_computed_mode(&mut self) {
        let mut base = self.stack[0] & TtdMode::BASE_MODES;
        let mut modifiers = TtdMode::empty();
        for &mode in &self.stack[1..] {
            let mode_base = mode & TtdMode::BASE_MODES;
            if !mode_base.is_empty() {
                base &= mode_base;
            }
            modifiers |= mode & !TtdMode::BASE_MODES;
        }
        self.current = base | modifiers;
    }

    /// Recording and running on behalf of the program
    #[inline]
    pub fn should_perform_record_action(&self) -> bool {
        (self.current & TtdMode::SHOULD_RECORD_ACTION_MASK) == TtdMode::RECORD_ENABLED
    }

    /// Debugging and running on behalf of the program
    #[inline]
    pub fn should_perform_debug_action(&self) -> bool {
        (self.current & TtdMode::SHOULD_DEBUG_ACTION_MASK) == TtdMode::DEBUGGING_ENABLED
    }

    /// Breakpoint bookkeeping applies (debugging, replaying, not excluded)
    #[inline]
    pub fn should_perform_debug_breakpoint_action(&self) -> bool {
        self.should_perform_debug_action() && self.current.contains(TtdMode::REPLAY_ENABLED)
    }

    #[inline]
    pub fn is_record_mode(&self) -> bool {
        self.current.contains(TtdMode::RECORD_ENABLED)
    }

    #[inline]
    pub fn is_replay_mode(&self) -> bool {
        self.current.contains(TtdMode::REPLAY_ENABLED)
    }

    #[inline]
    pub fn is_debugging_mode(&self) -> bool {
        self.current.contains(TtdMode::DEBUGGING_ENABLED)
    }

    #[inline]
    pub fn is_excluded(&self) -> bool {
        self.current.contains(TtdMode::EXCLUDED_EXECUTION)
    }
}

impl Default for ModeStack {
    fn default() -> Self {
        Self::new(TtdMode::PENDING)
    }
}
