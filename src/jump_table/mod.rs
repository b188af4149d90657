//! Instruction dispatch: one handler per opcode, grouped by category.

pub mod bitwise;
pub mod compound;
pub mod control;
pub mod numeric;
pub mod push;
pub mod slot_ops;
pub mod splice;
pub mod stack_ops;
pub mod types;

use once_cell::sync::Lazy;

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::op_code::OpCode;

/// A handler implementing one opcode.
pub type InstructionHandler = fn(&mut ExecutionEngine, &Instruction) -> VmResult<()>;

static SHARED: Lazy<JumpTable> = Lazy::new(JumpTable::new);

/// The dispatch table mapping opcode bytes to handlers.
#[derive(Clone)]
pub struct JumpTable {
    handlers: [Option<InstructionHandler>; 256],
}

impl JumpTable {
    /// Creates a table with every implemented opcode registered.
    pub fn new() -> Self {
        let mut table = Self {
            handlers: [None; 256],
        };
        push::register_handlers(&mut table);
        control::register_handlers(&mut table);
        stack_ops::register_handlers(&mut table);
        slot_ops::register_handlers(&mut table);
        splice::register_handlers(&mut table);
        bitwise::register_handlers(&mut table);
        numeric::register_handlers(&mut table);
        compound::register_handlers(&mut table);
        types::register_handlers(&mut table);
        table
    }

    /// The process-wide default table.
    pub fn shared() -> &'static JumpTable {
        &SHARED
    }

    /// Registers `handler` for `opcode`, replacing any existing entry.
    pub fn register(&mut self, opcode: OpCode, handler: InstructionHandler) {
        self.handlers[opcode as usize] = Some(handler);
    }

    /// The handler for `opcode`, if registered.
    pub fn get(&self, opcode: OpCode) -> Option<InstructionHandler> {
        self.handlers[opcode as usize]
    }
}

impl Default for JumpTable {
    fn default() -> Self {
        Self::new()
    }
}
