//! VM execution state flags.

use bitflags::bitflags;

bitflags! {
    /// Indicates the status of the virtual machine.
    ///
    /// A freshly created engine starts in `BREAK`; `execute` moves it to
    /// `NONE` and the run ends in either `HALT` or `FAULT`. Every transition
    /// is observable through the state-changed hook.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
    pub struct VMState: u8 {
        /// Execution has not started or is currently running.
        const NONE = 0;
        /// Execution completed successfully.
        const HALT = 1 << 0;
        /// Execution terminated because of an unhandled fault.
        const FAULT = 1 << 1;
        /// Execution is paused, e.g. before the first step.
        const BREAK = 1 << 2;
    }
}

impl VMState {
    /// Returns `true` when the VM has halted successfully.
    pub fn is_halt(self) -> bool {
        self.contains(VMState::HALT)
    }

    /// Returns `true` when the VM faulted.
    pub fn is_fault(self) -> bool {
        self.contains(VMState::FAULT)
    }

    /// Returns `true` when the VM is paused.
    pub fn is_break(self) -> bool {
        self.contains(VMState::BREAK)
    }

    /// Returns `true` when no further instructions will execute.
    pub fn is_terminal(self) -> bool {
        self.is_halt() || self.is_fault()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(VMState::HALT.is_halt());
        assert!(VMState::HALT.is_terminal());
        assert!(VMState::FAULT.is_fault());
        assert!(VMState::FAULT.is_terminal());
        assert!(VMState::BREAK.is_break());
        assert!(!VMState::BREAK.is_terminal());
        assert!(!VMState::NONE.is_terminal());
    }
}
