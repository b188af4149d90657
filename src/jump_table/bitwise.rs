//! Handlers for bitwise logic and item equality.

use crate::error::VmResult;
use crate::execution_engine::ExecutionEngine;
use crate::instruction::Instruction;
use crate::jump_table::JumpTable;
use crate::op_code::OpCode;

pub(crate) fn register_handlers(table: &mut JumpTable) {
    table.register(OpCode::INVERT, invert);
    table.register(OpCode::AND, and);
    table.register(OpCode::OR, or);
    table.register(OpCode::XOR, xor);
    table.register(OpCode::EQUAL, equal);
    table.register(OpCode::NOTEQUAL, notequal);
}

fn invert(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x = engine.pop_int()?;
    engine.push_integer(!x)
}

fn and(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 & x2)
}

fn or(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 | x2)
}

fn xor(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop_int()?;
    let x1 = engine.pop_int()?;
    engine.push_integer(x1 ^ x2)
}

/// EQUAL: item equality, which is reference identity for compound types.
fn equal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    engine.push_bool(x1.equals(&x2))
}

fn notequal(engine: &mut ExecutionEngine, _instruction: &Instruction) -> VmResult<()> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    engine.push_bool(!x1.equals(&x2))
}
