//! Restrictions enforced on a running engine.

use crate::error::{VmError, VmResult};

/// Limits an [`crate::ExecutionEngine`] checks during execution.
///
/// The defaults match the platform's consensus parameters; embedders may
/// tighten them per engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionEngineLimits {
    /// The maximum shift amount for SHL/SHR.
    pub max_shift: u32,

    /// The upper bound `check_zero_referred` may report after any step.
    pub max_stack_size: usize,

    /// The maximum byte length of any ByteString or Buffer.
    pub max_item_size: usize,

    /// The maximum number of frames on the invocation stack.
    pub max_invocation_stack_size: usize,

    /// The maximum number of nested try frames per execution context.
    pub max_try_nesting_depth: usize,
}

impl Default for ExecutionEngineLimits {
    fn default() -> Self {
        Self {
            max_shift: 256,
            max_stack_size: 2048,
            max_item_size: 1024 * 1024,
            max_invocation_stack_size: 1024,
            max_try_nesting_depth: 16,
        }
    }
}

impl ExecutionEngineLimits {
    /// Validates a prospective ByteString/Buffer length.
    pub fn assert_max_item_size(&self, size: usize) -> VmResult<()> {
        if size > self.max_item_size {
            return Err(VmError::item_too_large(size, self.max_item_size));
        }
        Ok(())
    }

    /// Validates a shift amount for SHL/SHR.
    pub fn assert_shift(&self, shift: i64) -> VmResult<()> {
        if shift < 0 || shift > self.max_shift as i64 {
            return Err(VmError::out_of_range(format!(
                "shift {shift} not in [0, {}]",
                self.max_shift
            )));
        }
        Ok(())
    }
}
