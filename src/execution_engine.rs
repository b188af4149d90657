//! The dispatch engine: invocation stack management, the single-step
//! execution loop and the structured-exception unwinder.

use std::cmp::Ordering;

use num_bigint::{BigInt, Sign};
use num_traits::ToPrimitive;

use crate::error::{VmError, VmResult};
use crate::evaluation_stack::EvaluationStack;
use crate::exception_handling::ExceptionHandlingState;
use crate::execution_context::ExecutionContext;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::limits::ExecutionEngineLimits;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::stack_item::{integer_size, StackItem, MAX_INTEGER_SIZE};
use crate::vm_state::VMState;

/// Extension points consumed by the engine. Embedders implement this to add
/// gas accounting, tracing and syscall tables; every method has a default so
/// implementors override only what they need.
pub trait EngineHooks {
    /// Runs before each instruction. An error here faults the engine and is
    /// never delivered to a catch block, which makes this the place to
    /// enforce deadlines or gas.
    fn pre_execute_instruction(
        &mut self,
        _engine: &mut ExecutionEngine,
        _instruction: &Instruction,
    ) -> VmResult<()> {
        Ok(())
    }

    /// Runs after each instruction, following the engine's own
    /// live-reference check.
    fn post_execute_instruction(
        &mut self,
        _engine: &mut ExecutionEngine,
        _instruction: &Instruction,
    ) -> VmResult<()> {
        Ok(())
    }

    /// Dispatches a SYSCALL by method identifier.
    fn on_syscall(&mut self, _engine: &mut ExecutionEngine, method: u32) -> VmResult<()> {
        Err(VmError::unsupported_syscall(method))
    }

    /// Resolves a CALLT token.
    fn load_token(&mut self, _engine: &mut ExecutionEngine, token: u16) -> VmResult<()> {
        Err(VmError::missing_token(token))
    }

    /// Observes every state transition.
    fn on_state_changed(&mut self, _engine: &ExecutionEngine) {}

    /// Observes the error that faulted the engine.
    fn on_fault(&mut self, _engine: &ExecutionEngine, _error: &VmError) {}

    /// Observes a frame about to be pushed onto the invocation stack.
    fn on_load_context(&mut self, _engine: &ExecutionEngine, _context: &ExecutionContext) {}

    /// Observes a frame after it was removed from the invocation stack.
    fn on_context_unloaded(&mut self, _engine: &ExecutionEngine, _context: &ExecutionContext) {}
}

/// The virtual machine execution engine.
pub struct ExecutionEngine {
    state: VMState,
    limits: ExecutionEngineLimits,
    reference_counter: ReferenceCounter,
    invocation_stack: Vec<ExecutionContext>,
    result_stack: EvaluationStack,
    uncaught_exception: Option<StackItem>,
    jump_table: JumpTable,
    hooks: Option<Box<dyn EngineHooks>>,
    /// Set by handlers that transferred control, suppressing the automatic
    /// instruction-pointer advance after dispatch.
    pub(crate) is_jumping: bool,
}

impl ExecutionEngine {
    /// Creates an engine with default limits.
    pub fn new() -> Self {
        Self::with_limits(ExecutionEngineLimits::default())
    }

    /// Creates an engine with custom limits.
    pub fn with_limits(limits: ExecutionEngineLimits) -> Self {
        let reference_counter = ReferenceCounter::new();
        Self {
            state: VMState::BREAK,
            limits,
            reference_counter: reference_counter.clone(),
            invocation_stack: Vec::new(),
            result_stack: EvaluationStack::new(reference_counter),
            uncaught_exception: None,
            jump_table: JumpTable::shared().clone(),
            hooks: None,
            is_jumping: false,
        }
    }

    /// Installs embedder hooks.
    pub fn set_hooks(&mut self, hooks: Box<dyn EngineHooks>) {
        self.hooks = Some(hooks);
    }

    /// The current VM state.
    pub fn state(&self) -> VMState {
        self.state
    }

    /// The limits this engine enforces.
    pub fn limits(&self) -> &ExecutionEngineLimits {
        &self.limits
    }

    /// The engine's reference counter.
    pub fn reference_counter(&self) -> &ReferenceCounter {
        &self.reference_counter
    }

    /// The invocation stack, bottom first.
    pub fn invocation_stack(&self) -> &[ExecutionContext] {
        &self.invocation_stack
    }

    /// The active frame, when the invocation stack is non-empty.
    pub fn current_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.last()
    }

    /// The active frame, mutable.
    pub fn current_context_mut(&mut self) -> Option<&mut ExecutionContext> {
        self.invocation_stack.last_mut()
    }

    /// The frame loaded first, cleared when the stack empties.
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.first()
    }

    /// Values returned by the entry frame.
    pub fn result_stack(&self) -> &EvaluationStack {
        &self.result_stack
    }

    /// Values returned by the entry frame, mutable.
    pub fn result_stack_mut(&mut self) -> &mut EvaluationStack {
        &mut self.result_stack
    }

    /// The pending exception while the unwinder runs, and the thrown item
    /// after an unhandled-exception fault.
    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    fn set_state(&mut self, state: VMState) {
        if self.state != state {
            log::debug!("vm state {:?} -> {:?}", self.state, state);
            self.state = state;
            self.with_hooks(|hooks, engine| hooks.on_state_changed(engine));
        }
    }

    fn on_fault(&mut self, error: VmError) {
        log::debug!("vm fault [{}]: {error}", error.category());
        self.with_hooks(|hooks, engine| hooks.on_fault(engine, &error));
        self.set_state(VMState::FAULT);
    }

    fn with_hooks<T>(
        &mut self,
        call: impl FnOnce(&mut Box<dyn EngineHooks>, &mut Self) -> T,
    ) -> Option<T> {
        let mut hooks = self.hooks.take()?;
        let result = call(&mut hooks, self);
        self.hooks = Some(hooks);
        Some(result)
    }

    // -- driving ----------------------------------------------------------

    /// Runs until the engine halts or faults, returning the final state.
    pub fn execute(&mut self) -> VMState {
        if self.state == VMState::BREAK {
            self.set_state(VMState::NONE);
        }
        while !self.state.is_terminal() {
            self.execute_next();
        }
        self.state
    }

    /// Executes a single instruction. Errors raised anywhere in the step
    /// are routed to the fault handler.
    pub fn execute_next(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        if self.invocation_stack.is_empty() {
            self.set_state(VMState::HALT);
            return;
        }
        if let Err(error) = self.execute_next_inner() {
            self.on_fault(error);
        }
    }

    fn execute_next_inner(&mut self) -> VmResult<()> {
        let context = self.context()?;
        let instruction = context.current_instruction()?;
        self.pre_execute_instruction(&instruction)?;
        self.execute_instruction(&instruction)?;
        self.post_execute_instruction(&instruction)?;
        Ok(())
    }

    fn pre_execute_instruction(&mut self, instruction: &Instruction) -> VmResult<()> {
        self.with_hooks(|hooks, engine| hooks.pre_execute_instruction(engine, instruction))
            .unwrap_or(Ok(()))
    }

    fn post_execute_instruction(&mut self, instruction: &Instruction) -> VmResult<()> {
        let live = self.reference_counter.check_zero_referred();
        if live > self.limits.max_stack_size {
            return Err(VmError::stack_overflow(live, self.limits.max_stack_size));
        }
        self.with_hooks(|hooks, engine| hooks.post_execute_instruction(engine, instruction))
            .unwrap_or(Ok(()))
    }

    /// Dispatches one instruction and advances the instruction pointer
    /// unless the handler transferred control. An error from the handler is
    /// recovered into a user exception when the current frame has an active
    /// try region and the error is catchable; otherwise it propagates to the
    /// fault handler.
    fn execute_instruction(&mut self, instruction: &Instruction) -> VmResult<()> {
        log::trace!(
            "execute {:?} at {}",
            instruction.opcode(),
            instruction.pointer()
        );
        self.is_jumping = false;
        let depth_before = self.invocation_stack.len();

        let handler = self
            .jump_table
            .get(instruction.opcode())
            .ok_or_else(|| VmError::invalid_opcode(instruction.opcode() as u8))?;
        if let Err(error) = handler(self, instruction) {
            if error.is_catchable() && self.current_frame_has_try() {
                log::debug!("recovering fault into a user exception: {error}");
                self.uncaught_exception =
                    Some(StackItem::from_byte_string(error.to_string().into_bytes()));
                self.handle_exception()?;
                return Ok(());
            }
            return Err(error);
        }

        if !self.is_jumping {
            // Advance the frame that was current when the instruction was
            // fetched: after a call that is the caller, one below the top.
            let depth_after = self.invocation_stack.len();
            let index = match depth_after.cmp(&depth_before) {
                Ordering::Greater => depth_before.checked_sub(1),
                Ordering::Equal => depth_after.checked_sub(1),
                Ordering::Less => None,
            };
            if let Some(index) = index {
                let size = instruction.size();
                let context = &mut self.invocation_stack[index];
                context.set_instruction_pointer(context.instruction_pointer() + size);
            }
        }
        Ok(())
    }

    fn current_frame_has_try(&self) -> bool {
        self.invocation_stack
            .last()
            .is_some_and(ExecutionContext::has_try_frames)
    }

    // -- context management ------------------------------------------------

    /// Pushes a new top-level frame for `script`.
    pub fn load_script(&mut self, script: Script, initial_position: usize) -> VmResult<()> {
        if initial_position > script.len() {
            return Err(VmError::out_of_range(format!(
                "initial position {initial_position} outside script of {} bytes",
                script.len()
            )));
        }
        let context = ExecutionContext::new(script, self.reference_counter.clone(), initial_position);
        self.load_context(context)
    }

    pub(crate) fn load_context(&mut self, context: ExecutionContext) -> VmResult<()> {
        if self.invocation_stack.len() >= self.limits.max_invocation_stack_size {
            return Err(VmError::invocation_overflow(
                self.invocation_stack.len() + 1,
                self.limits.max_invocation_stack_size,
            ));
        }
        log::debug!(
            "load context at {} (depth {})",
            context.instruction_pointer(),
            self.invocation_stack.len() + 1
        );
        self.with_hooks(|hooks, engine| hooks.on_load_context(engine, &context));
        self.invocation_stack.push(context);
        Ok(())
    }

    fn unload_context(&mut self, mut context: ExecutionContext) {
        self.with_hooks(|hooks, engine| hooks.on_context_unloaded(engine, &context));
        context.evaluation_stack_mut().clear();
        context.clear_slots();
        let statics_shared = self
            .invocation_stack
            .last()
            .is_some_and(|current| current.shares_static_fields(&context));
        if !statics_shared {
            context.clear_static_fields();
        }
        log::debug!("context unloaded (depth {})", self.invocation_stack.len());
    }

    fn truncate_invocation_stack(&mut self, keep: usize) {
        while self.invocation_stack.len() > keep {
            if let Some(context) = self.invocation_stack.pop() {
                self.unload_context(context);
            }
        }
    }

    pub(crate) fn context(&self) -> VmResult<&ExecutionContext> {
        self.invocation_stack
            .last()
            .ok_or_else(|| VmError::invalid_operation("no current context"))
    }

    pub(crate) fn context_mut(&mut self) -> VmResult<&mut ExecutionContext> {
        self.invocation_stack
            .last_mut()
            .ok_or_else(|| VmError::invalid_operation("no current context"))
    }

    // -- control transfer --------------------------------------------------

    /// Validates `position` against the current script and moves the
    /// instruction pointer there.
    pub(crate) fn jump_to(&mut self, position: i64) -> VmResult<()> {
        let context = self.context_mut()?;
        let length = context.script().len() as i64;
        if position < 0 || position > length {
            return Err(VmError::out_of_range(format!(
                "jump target {position} outside [0, {length}]"
            )));
        }
        context.set_instruction_pointer(position as usize);
        self.is_jumping = true;
        Ok(())
    }

    /// Jumps relative to the current instruction's position.
    pub(crate) fn execute_jump_offset(&mut self, offset: i32) -> VmResult<()> {
        let origin = self.context()?.instruction_pointer() as i64;
        self.jump_to(origin + offset as i64)
    }

    /// Clones the current frame at an absolute position and pushes it.
    pub(crate) fn call_to(&mut self, position: i64) -> VmResult<()> {
        let context = self.context()?;
        let length = context.script().len() as i64;
        if position < 0 || position > length {
            return Err(VmError::out_of_range(format!(
                "call target {position} outside [0, {length}]"
            )));
        }
        let callee = context.clone_at(position as usize);
        self.load_context(callee)
    }

    /// Clones the current frame at an offset from the current instruction.
    pub(crate) fn execute_call_offset(&mut self, offset: i32) -> VmResult<()> {
        let origin = self.context()?.instruction_pointer() as i64;
        self.call_to(origin + offset as i64)
    }

    /// Pops the current frame and moves its evaluation stack onto the
    /// caller's stack, or onto the result stack when the invocation stack
    /// empties, in which case the engine halts.
    pub(crate) fn execute_ret(&mut self) -> VmResult<()> {
        let mut context = self
            .invocation_stack
            .pop()
            .ok_or_else(|| VmError::invalid_operation("no current context"))?;
        if let Some(caller) = self.invocation_stack.last_mut() {
            context
                .evaluation_stack_mut()
                .copy_to(caller.evaluation_stack_mut());
        } else {
            context.evaluation_stack_mut().copy_to(&mut self.result_stack);
        }
        self.unload_context(context);
        if self.invocation_stack.is_empty() {
            self.set_state(VMState::HALT);
        }
        self.is_jumping = true;
        Ok(())
    }

    // -- exceptions ---------------------------------------------------------

    /// Makes `item` the pending exception and runs the unwinder.
    pub fn throw(&mut self, item: StackItem) -> VmResult<()> {
        log::debug!("exception thrown: {:?}", item.item_type());
        self.uncaught_exception = Some(item);
        self.handle_exception()
    }

    /// Walks the invocation stack from the current frame outward looking
    /// for a try frame that still gets a chance at the pending exception.
    /// Frames above the handler are unloaded; an exhausted walk surfaces an
    /// unhandled-exception error.
    pub(crate) fn handle_exception(&mut self) -> VmResult<()> {
        let mut frame_index = self.invocation_stack.len();
        while frame_index > 0 {
            frame_index -= 1;
            loop {
                let Some(snapshot) = self.invocation_stack[frame_index]
                    .try_frame()
                    .map(|frame| (frame.state(), frame.catch_pointer(), frame.finally_pointer()))
                else {
                    break;
                };
                match snapshot {
                    // Already had its chance at this exception.
                    (ExceptionHandlingState::Finally, _, _)
                    | (ExceptionHandlingState::Catch, _, None) => {
                        self.invocation_stack[frame_index].pop_try();
                    }
                    // A live catch handler: deliver the exception to it.
                    (ExceptionHandlingState::Try, Some(target), _) => {
                        self.truncate_invocation_stack(frame_index + 1);
                        let exception = self.uncaught_exception.take().ok_or_else(|| {
                            VmError::invalid_operation("unwinder entered with no pending exception")
                        })?;
                        let context = &mut self.invocation_stack[frame_index];
                        if let Some(frame) = context.try_frame_mut() {
                            frame.set_state(ExceptionHandlingState::Catch);
                        }
                        context.evaluation_stack_mut().push(exception);
                        context.set_instruction_pointer(target);
                        self.is_jumping = true;
                        return Ok(());
                    }
                    // A finally block that must run before unwinding resumes;
                    // the pending exception stays set for ENDFINALLY.
                    (_, _, Some(target)) => {
                        self.truncate_invocation_stack(frame_index + 1);
                        let context = &mut self.invocation_stack[frame_index];
                        if let Some(frame) = context.try_frame_mut() {
                            frame.set_state(ExceptionHandlingState::Finally);
                        }
                        context.set_instruction_pointer(target);
                        self.is_jumping = true;
                        return Ok(());
                    }
                    _ => {
                        self.invocation_stack[frame_index].pop_try();
                    }
                }
            }
        }
        let message = self
            .uncaught_exception
            .as_ref()
            .map(describe_exception)
            .unwrap_or_default();
        Err(VmError::unhandled_exception(message))
    }

    pub(crate) fn has_uncaught_exception(&self) -> bool {
        self.uncaught_exception.is_some()
    }

    // -- host dispatch ------------------------------------------------------

    pub(crate) fn invoke_syscall(&mut self, method: u32) -> VmResult<()> {
        match self.with_hooks(|hooks, engine| hooks.on_syscall(engine, method)) {
            Some(result) => result,
            None => Err(VmError::unsupported_syscall(method)),
        }
    }

    pub(crate) fn invoke_load_token(&mut self, token: u16) -> VmResult<()> {
        match self.with_hooks(|hooks, engine| hooks.load_token(engine, token)) {
            Some(result) => result,
            None => Err(VmError::missing_token(token)),
        }
    }

    // -- stack helpers ------------------------------------------------------

    /// Pushes onto the current frame's evaluation stack.
    pub fn push(&mut self, item: StackItem) -> VmResult<()> {
        self.context_mut()?.evaluation_stack_mut().push(item);
        Ok(())
    }

    /// Pushes a boolean result.
    pub fn push_bool(&mut self, value: bool) -> VmResult<()> {
        self.push(StackItem::from_bool(value))
    }

    /// Pushes an integer result, enforcing the value model's width cap.
    pub fn push_integer(&mut self, value: BigInt) -> VmResult<()> {
        if integer_size(&value) > MAX_INTEGER_SIZE {
            return Err(VmError::number_out_of_range(format!(
                "integer result wider than {MAX_INTEGER_SIZE} bytes"
            )));
        }
        self.push(StackItem::Integer(value))
    }

    /// Pops from the current frame's evaluation stack.
    pub fn pop(&mut self) -> VmResult<StackItem> {
        self.context_mut()?.evaluation_stack_mut().pop()
    }

    /// Pops and coerces to an integer.
    pub fn pop_int(&mut self) -> VmResult<BigInt> {
        self.pop()?.as_int()
    }

    /// Pops and coerces to a boolean.
    pub fn pop_bool(&mut self) -> VmResult<bool> {
        Ok(self.pop()?.as_bool())
    }

    /// Pops a non-negative count or index that must fit the address space.
    pub fn pop_count(&mut self) -> VmResult<usize> {
        let value = self.pop_int()?;
        if value.sign() == Sign::Minus {
            return Err(VmError::out_of_range(format!("negative count {value}")));
        }
        value
            .to_usize()
            .ok_or_else(|| VmError::out_of_range(format!("count {value} too large")))
    }

    /// Clones the item `index` positions below the current frame's top.
    pub fn peek(&self, index: usize) -> VmResult<StackItem> {
        Ok(self.context()?.evaluation_stack().peek(index)?.clone())
    }
}

impl Default for ExecutionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn describe_exception(item: &StackItem) -> String {
    match item {
        StackItem::ByteString(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        StackItem::Integer(value) => value.to_string(),
        other => format!("{:?}", other.item_type()),
    }
}
