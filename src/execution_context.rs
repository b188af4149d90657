//! Call frames.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{VmError, VmResult};
use crate::evaluation_stack::EvaluationStack;
use crate::exception_handling::ExceptionHandlingContext;
use crate::instruction::Instruction;
use crate::reference_counter::ReferenceCounter;
use crate::script::Script;
use crate::slot::Slot;
use crate::stack_item::StackItem;

/// State shared between a frame and the frames cloned from it: the script
/// and the static field slot. CALL-style clones stay inside the same script
/// and observe the same static fields; each keeps its own evaluation stack,
/// locals, arguments and try stack.
#[derive(Debug, Clone)]
pub struct SharedStates {
    script: Script,
    static_fields: Rc<RefCell<Option<Slot>>>,
}

impl SharedStates {
    fn new(script: Script) -> Self {
        Self {
            script,
            static_fields: Rc::new(RefCell::new(None)),
        }
    }
}

/// One frame on the invocation stack.
#[derive(Debug)]
pub struct ExecutionContext {
    shared: SharedStates,
    instruction_pointer: usize,
    evaluation_stack: EvaluationStack,
    local_variables: Option<Slot>,
    arguments: Option<Slot>,
    try_stack: Option<Vec<ExceptionHandlingContext>>,
}

impl ExecutionContext {
    /// Creates a top-level frame for `script` starting at
    /// `initial_position`.
    pub fn new(
        script: Script,
        reference_counter: ReferenceCounter,
        initial_position: usize,
    ) -> Self {
        Self {
            shared: SharedStates::new(script),
            instruction_pointer: initial_position,
            evaluation_stack: EvaluationStack::new(reference_counter),
            local_variables: None,
            arguments: None,
            try_stack: None,
        }
    }

    /// Clones this frame for a call: shares the script and static fields,
    /// starts at `position` with a fresh evaluation stack and absent
    /// locals, arguments and try stack.
    pub fn clone_at(&self, position: usize) -> Self {
        Self {
            shared: self.shared.clone(),
            instruction_pointer: position,
            evaluation_stack: EvaluationStack::new(self.reference_counter().clone()),
            local_variables: None,
            arguments: None,
            try_stack: None,
        }
    }

    /// The script this frame executes.
    pub fn script(&self) -> &Script {
        &self.shared.script
    }

    /// The counter this frame's stack and slots report to.
    pub fn reference_counter(&self) -> &ReferenceCounter {
        self.evaluation_stack.reference_counter()
    }

    /// The current instruction pointer.
    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    /// Moves the instruction pointer.
    pub fn set_instruction_pointer(&mut self, position: usize) {
        self.instruction_pointer = position;
    }

    /// Decodes the instruction at the current pointer. At or past the end
    /// of the script this yields a synthetic RET of size 1, which is how
    /// scripts terminate without an explicit RET.
    pub fn current_instruction(&self) -> VmResult<Instruction> {
        if self.instruction_pointer >= self.script().len() {
            return Ok(Instruction::synthetic_ret(self.instruction_pointer));
        }
        self.script().instruction_at(self.instruction_pointer)
    }

    /// Advances the pointer past the current instruction.
    pub fn move_next(&mut self) -> VmResult<()> {
        self.instruction_pointer += self.current_instruction()?.size();
        Ok(())
    }

    /// The frame's operand stack.
    pub fn evaluation_stack(&self) -> &EvaluationStack {
        &self.evaluation_stack
    }

    /// The frame's operand stack, mutable.
    pub fn evaluation_stack_mut(&mut self) -> &mut EvaluationStack {
        &mut self.evaluation_stack
    }

    // -- static fields ----------------------------------------------------

    /// Creates the static field slot. Fails when it already exists.
    pub fn init_static_fields(&mut self, count: usize) -> VmResult<()> {
        let mut fields = self.shared.static_fields.borrow_mut();
        if fields.is_some() {
            return Err(VmError::invalid_operation(
                "static field slot already initialized",
            ));
        }
        *fields = Some(Slot::with_count(count, self.reference_counter().clone()));
        Ok(())
    }

    /// Reads a static field.
    pub fn load_static_field(&self, index: usize) -> VmResult<StackItem> {
        let fields = self.shared.static_fields.borrow();
        let slot = fields
            .as_ref()
            .ok_or_else(|| VmError::invalid_operation("static field slot not initialized"))?;
        Ok(slot.get(index)?.clone())
    }

    /// Writes a static field.
    pub fn store_static_field(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        let mut fields = self.shared.static_fields.borrow_mut();
        let slot = fields
            .as_mut()
            .ok_or_else(|| VmError::invalid_operation("static field slot not initialized"))?;
        slot.set(index, item)
    }

    /// Returns `true` when `other` shares this frame's static field slot.
    pub fn shares_static_fields(&self, other: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.shared.static_fields, &other.shared.static_fields)
    }

    /// Releases the static field slot. Used when the outermost frame owning
    /// it unloads.
    pub fn clear_static_fields(&mut self) {
        let mut fields = self.shared.static_fields.borrow_mut();
        if let Some(slot) = fields.as_mut() {
            slot.clear_references();
        }
        *fields = None;
    }

    // -- locals and arguments ---------------------------------------------

    /// Creates the local variable and argument slots. Fails when either
    /// already exists.
    pub fn init_slot(&mut self, local_count: usize, arguments: Vec<StackItem>) -> VmResult<()> {
        if self.local_variables.is_some() || self.arguments.is_some() {
            return Err(VmError::invalid_operation(
                "local variable slots already initialized",
            ));
        }
        let counter = self.reference_counter().clone();
        self.local_variables = Some(Slot::with_count(local_count, counter.clone()));
        self.arguments = Some(Slot::new(arguments, counter));
        Ok(())
    }

    /// The local variable slot, if initialized.
    pub fn local_variables(&self) -> Option<&Slot> {
        self.local_variables.as_ref()
    }

    /// The argument slot, if initialized.
    pub fn arguments(&self) -> Option<&Slot> {
        self.arguments.as_ref()
    }

    /// Reads a local variable.
    pub fn load_local(&self, index: usize) -> VmResult<StackItem> {
        let slot = self
            .local_variables
            .as_ref()
            .ok_or_else(|| VmError::invalid_operation("local variable slot not initialized"))?;
        Ok(slot.get(index)?.clone())
    }

    /// Writes a local variable.
    pub fn store_local(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        let slot = self
            .local_variables
            .as_mut()
            .ok_or_else(|| VmError::invalid_operation("local variable slot not initialized"))?;
        slot.set(index, item)
    }

    /// Reads an argument.
    pub fn load_argument(&self, index: usize) -> VmResult<StackItem> {
        let slot = self
            .arguments
            .as_ref()
            .ok_or_else(|| VmError::invalid_operation("argument slot not initialized"))?;
        Ok(slot.get(index)?.clone())
    }

    /// Writes an argument.
    pub fn store_argument(&mut self, index: usize, item: StackItem) -> VmResult<()> {
        let slot = self
            .arguments
            .as_mut()
            .ok_or_else(|| VmError::invalid_operation("argument slot not initialized"))?;
        slot.set(index, item)
    }

    /// Releases the locals and arguments. Invoked at frame unload.
    pub fn clear_slots(&mut self) {
        if let Some(slot) = self.local_variables.as_mut() {
            slot.clear_references();
        }
        if let Some(slot) = self.arguments.as_mut() {
            slot.clear_references();
        }
    }

    // -- try stack ---------------------------------------------------------

    /// Pushes a try frame, respecting the nesting limit.
    pub fn push_try(
        &mut self,
        frame: ExceptionHandlingContext,
        max_depth: usize,
    ) -> VmResult<()> {
        let stack = self.try_stack.get_or_insert_with(Vec::new);
        if stack.len() >= max_depth {
            return Err(VmError::try_nesting_too_deep(stack.len() + 1, max_depth));
        }
        stack.push(frame);
        Ok(())
    }

    /// Pops the innermost try frame.
    pub fn pop_try(&mut self) -> Option<ExceptionHandlingContext> {
        self.try_stack.as_mut()?.pop()
    }

    /// The innermost try frame.
    pub fn try_frame(&self) -> Option<&ExceptionHandlingContext> {
        self.try_stack.as_ref()?.last()
    }

    /// The innermost try frame, mutable.
    pub fn try_frame_mut(&mut self) -> Option<&mut ExceptionHandlingContext> {
        self.try_stack.as_mut()?.last_mut()
    }

    /// Returns `true` when the frame has at least one active try region.
    pub fn has_try_frames(&self) -> bool {
        self.try_stack.as_ref().is_some_and(|stack| !stack.is_empty())
    }
}
